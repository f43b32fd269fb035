//! Builders for the networks that make up one level of the cascade

use rand::Rng;
use serde::{Serialize, Deserialize};

use super::network::{Head, Mlp};
use crate::{CascadeGanError, Result};

/// Hidden layer widths of the generated networks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    /// Hidden widths shared by the four generator roles
    pub generator_hidden: Vec<usize>,
    /// Hidden widths of the critic
    pub discriminator_hidden: Vec<usize>,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        ArchitectureConfig {
            generator_hidden: vec![64, 64],
            discriminator_hidden: vec![64, 32],
        }
    }
}

/// Flattened geometry width of a tree with `n_nodes` nodes
pub fn geometry_width(n_nodes: usize) -> usize {
    n_nodes.saturating_sub(1) * 3
}

/// Flattened topology width of a tree with `n_nodes` nodes
pub fn topology_width(n_nodes: usize) -> usize {
    n_nodes.saturating_sub(2) * n_nodes
}

/// Sizes that determine the networks of a level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelShape {
    /// Nodes per tree at this level
    pub n_nodes: usize,
    /// Nodes per tree of the conditioning level, `None` at level 0
    pub context_nodes: Option<usize>,
    /// Noise width
    pub noise_dim: usize,
}

impl LevelShape {
    /// Widths of the context inputs `[geometry, topology]`, empty at level 0
    pub fn context_dims(&self) -> Vec<usize> {
        match self.context_nodes {
            Some(n) => vec![geometry_width(n), topology_width(n)],
            None => Vec::new(),
        }
    }

    fn generator_inputs(&self, conditional: Option<usize>) -> Vec<usize> {
        let mut dims = self.context_dims();
        dims.push(self.noise_dim);
        dims.extend(conditional);
        dims
    }
}

/// The five networks of one level
#[derive(Debug)]
pub struct LevelNetworks {
    /// Unconditioned geometry generator
    pub geometry: Mlp,
    /// Geometry generator conditioned on a topology
    pub conditional_geometry: Mlp,
    /// Unconditioned topology generator
    pub morphology: Mlp,
    /// Topology generator conditioned on a geometry
    pub conditional_morphology: Mlp,
    /// Critic over `(geometry, topology)` pairs
    pub discriminator: Mlp,
}

/// Build all networks of a level with fresh weights
pub fn build_level<R: Rng>(
    level: usize,
    shape: &LevelShape,
    architecture: &ArchitectureConfig,
    rng: &mut R,
) -> Result<LevelNetworks> {
    if shape.n_nodes < 3 {
        return Err(CascadeGanError::Configuration(format!(
            "Level {} needs at least 3 nodes, got {}", level, shape.n_nodes
        )));
    }

    let geom = geometry_width(shape.n_nodes);
    let topo = topology_width(shape.n_nodes);
    let softmax = Head::GroupedSoftmax { groups: shape.n_nodes - 2 };
    let hidden = &architecture.generator_hidden;

    Ok(LevelNetworks {
        geometry: Mlp::new(
            &format!("geometry_{}", level),
            shape.generator_inputs(None),
            hidden,
            geom,
            Head::Linear,
            rng,
        )?,
        conditional_geometry: Mlp::new(
            &format!("conditional_geometry_{}", level),
            shape.generator_inputs(Some(topo)),
            hidden,
            geom,
            Head::Linear,
            rng,
        )?,
        morphology: Mlp::new(
            &format!("morphology_{}", level),
            shape.generator_inputs(None),
            hidden,
            topo,
            softmax,
            rng,
        )?,
        conditional_morphology: Mlp::new(
            &format!("conditional_morphology_{}", level),
            shape.generator_inputs(Some(geom)),
            hidden,
            topo,
            softmax,
            rng,
        )?,
        discriminator: Mlp::new(
            &format!("discriminator_{}", level),
            vec![geom, topo],
            &architecture.discriminator_hidden,
            1,
            Head::Linear,
            rng,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Network;
    use rand::SeedableRng;

    #[test]
    fn test_level_zero_inputs_are_noise_only() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let shape = LevelShape { n_nodes: 5, context_nodes: None, noise_dim: 8 };
        let nets = build_level(0, &shape, &ArchitectureConfig::default(), &mut rng).unwrap();

        assert_eq!(nets.geometry.input_dims(), &[8]);
        assert_eq!(nets.morphology.output_dim(), 15);
        assert_eq!(nets.conditional_geometry.input_dims(), &[8, 15]);
        assert_eq!(nets.conditional_morphology.input_dims(), &[8, 12]);
        assert_eq!(nets.discriminator.input_dims(), &[12, 15]);
    }

    #[test]
    fn test_context_inputs_come_first() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let shape = LevelShape { n_nodes: 6, context_nodes: Some(4), noise_dim: 3 };
        let nets = build_level(1, &shape, &ArchitectureConfig::default(), &mut rng).unwrap();

        assert_eq!(nets.morphology.input_dims(), &[9, 8, 3]);
        assert_eq!(nets.conditional_geometry.input_dims(), &[9, 8, 3, 24]);
    }

    #[test]
    fn test_rejects_tiny_trees() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let shape = LevelShape { n_nodes: 2, context_nodes: None, noise_dim: 3 };
        assert!(build_level(0, &shape, &ArchitectureConfig::default(), &mut rng).is_err());
    }
}
