//! Composition of two generator roles and a critic into one stacked model

use ndarray::Array2;

use super::batch::SampleBatch;
use super::config::ConditioningRule;
use super::roles::{FreezeSet, Role};
use crate::nn::{geometry_width, topology_width, Gradients, ModelArena, ModelId, Trace};
use crate::{CascadeGanError, Result};

/// Arena ids of the five networks of a level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelRoles {
    /// Unconditioned geometry generator
    pub geometry: ModelId,
    /// Geometry generator conditioned on a topology
    pub conditional_geometry: ModelId,
    /// Unconditioned topology generator
    pub morphology: ModelId,
    /// Topology generator conditioned on a geometry
    pub conditional_morphology: ModelId,
    /// Critic
    pub discriminator: ModelId,
}

impl LevelRoles {
    /// Id of the network playing `role`
    pub fn get(&self, role: Role) -> ModelId {
        match role {
            Role::Geometry => self.geometry,
            Role::ConditionalGeometry => self.conditional_geometry,
            Role::Morphology => self.morphology,
            Role::ConditionalMorphology => self.conditional_morphology,
            Role::Discriminator => self.discriminator,
        }
    }
}

/// Forward pass through a stacked model
#[derive(Clone, Debug)]
pub struct StackedTrace {
    /// Pass of the unconditioned generator
    pub upstream: Trace,
    /// Pass of the conditional generator
    pub downstream: Trace,
    /// Pass of the critic
    pub critic: Trace,
    /// The generated pair
    pub sample: SampleBatch,
}

/// Result of one stacked update
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome {
    /// Loss of the critic's score against the targets
    pub loss: f32,
    /// Roles whose weights were changed
    pub updated: Vec<Role>,
}

/// Generator pair followed by the critic, referring to networks in an arena
///
/// Under `mgd` the morphology role produces the topology and the conditional
/// geometry role turns it into coordinates; `gmd` is the mirror image. Both
/// generators read `[context geometry, context topology]` (when conditioned on
/// a lower level) followed by the noise, and the conditional role also reads
/// the upstream output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackedModel {
    rule: ConditioningRule,
    roles: LevelRoles,
    use_context: bool,
    n_nodes: usize,
}

impl StackedModel {
    /// Check the role networks against the rule and build the stacked model
    pub fn compose(
        arena: &ModelArena,
        rule: ConditioningRule,
        roles: LevelRoles,
        use_context: bool,
    ) -> Result<Self> {
        let critic = arena.get(roles.discriminator)?;
        let critic_dims = critic.input_dims();
        if critic_dims.len() != 2 || critic.output_dim() != 1 || critic_dims[0] % 3 != 0 {
            return Err(CascadeGanError::Configuration(format!(
                "Critic '{}' must read (geometry, topology) and emit one score",
                critic.name()
            )));
        }
        let n_nodes = critic_dims[0] / 3 + 1;
        let (geom, topo) = (geometry_width(n_nodes), topology_width(n_nodes));
        if critic_dims[1] != topo {
            return Err(CascadeGanError::Configuration(format!(
                "Critic '{}' reads a topology of width {}, expected {}",
                critic.name(),
                critic_dims[1],
                topo
            )));
        }

        let (upstream_role, downstream_role) = rule.implicated_roles();
        let upstream = arena.get(roles.get(upstream_role))?;
        let downstream = arena.get(roles.get(downstream_role))?;
        let (upstream_width, downstream_width) = match rule {
            ConditioningRule::Mgd => (topo, geom),
            ConditioningRule::Gmd => (geom, topo),
        };

        let context_inputs = if use_context { 2 } else { 0 };
        let up_dims = upstream.input_dims();
        let down_dims = downstream.input_dims();
        if up_dims.len() != context_inputs + 1 || upstream.output_dim() != upstream_width {
            return Err(CascadeGanError::Configuration(format!(
                "Role {} ('{}') does not fit rule {}",
                upstream_role,
                upstream.name(),
                rule
            )));
        }
        if down_dims.len() != context_inputs + 2
            || down_dims[..context_inputs + 1] != up_dims[..]
            || down_dims[context_inputs + 1] != upstream_width
            || downstream.output_dim() != downstream_width
        {
            return Err(CascadeGanError::Configuration(format!(
                "Role {} ('{}') does not fit rule {}",
                downstream_role,
                downstream.name(),
                rule
            )));
        }

        Ok(StackedModel { rule, roles, use_context, n_nodes })
    }

    /// Factorization rule
    pub fn rule(&self) -> ConditioningRule {
        self.rule
    }

    /// Role ids
    pub fn roles(&self) -> &LevelRoles {
        &self.roles
    }

    /// Whether the generators read a lower-level sample
    pub fn use_context(&self) -> bool {
        self.use_context
    }

    /// Nodes per generated tree
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Generator inputs: context (if used) followed by the noise
    pub fn inputs(
        &self,
        context: Option<&SampleBatch>,
        noise: Array2<f32>,
    ) -> Result<Vec<Array2<f32>>> {
        match (self.use_context, context) {
            (true, Some(context)) => {
                let mut inputs = context.flat()?;
                inputs.push(noise);
                Ok(inputs)
            }
            (false, None) => Ok(vec![noise]),
            (true, None) => Err(CascadeGanError::Configuration(
                "Conditioned level called without a context sample".to_string(),
            )),
            (false, Some(_)) => Err(CascadeGanError::Configuration(
                "Unconditioned level called with a context sample".to_string(),
            )),
        }
    }

    /// Run both generators and the critic
    pub fn forward(&self, arena: &ModelArena, inputs: &[Array2<f32>]) -> Result<StackedTrace> {
        let (upstream_role, downstream_role) = self.rule.implicated_roles();
        let upstream = arena.get(self.roles.get(upstream_role))?.forward(inputs)?;

        let mut downstream_inputs = inputs.to_vec();
        downstream_inputs.push(upstream.output.clone());
        let downstream = arena.get(self.roles.get(downstream_role))?.forward(&downstream_inputs)?;

        let (geometry, topology) = match self.rule {
            ConditioningRule::Mgd => (&downstream.output, &upstream.output),
            ConditioningRule::Gmd => (&upstream.output, &downstream.output),
        };
        let critic = arena
            .get(self.roles.discriminator)?
            .forward(&[geometry.clone(), topology.clone()])?;
        let sample = SampleBatch::from_flat(geometry, topology, self.n_nodes)?;

        Ok(StackedTrace { upstream, downstream, critic, sample })
    }

    /// Generate a sample without scoring it
    pub fn sample(&self, arena: &ModelArena, inputs: &[Array2<f32>]) -> Result<SampleBatch> {
        let (upstream_role, downstream_role) = self.rule.implicated_roles();
        let upstream = arena.get(self.roles.get(upstream_role))?.predict(inputs)?;

        let mut downstream_inputs = inputs.to_vec();
        downstream_inputs.push(upstream.clone());
        let downstream = arena.get(self.roles.get(downstream_role))?.predict(&downstream_inputs)?;

        match self.rule {
            ConditioningRule::Mgd => SampleBatch::from_flat(&downstream, &upstream, self.n_nodes),
            ConditioningRule::Gmd => SampleBatch::from_flat(&upstream, &downstream, self.n_nodes),
        }
    }

    /// Critic score of a freshly generated sample
    pub fn predict(&self, arena: &ModelArena, inputs: &[Array2<f32>]) -> Result<Array2<f32>> {
        Ok(self.forward(arena, inputs)?.critic.output)
    }

    /// One gradient step through the critic into the generators
    ///
    /// The loss is the one the upstream generator was compiled with. Roles in
    /// `freeze` still pass gradients through but keep their weights. A
    /// non-finite loss is returned without touching any weights.
    pub fn train_on_batch(
        &self,
        arena: &mut ModelArena,
        inputs: &[Array2<f32>],
        targets: &Array2<f32>,
        freeze: &FreezeSet,
    ) -> Result<StepOutcome> {
        let (upstream_role, downstream_role) = self.rule.implicated_roles();
        let upstream_id = self.roles.get(upstream_role);
        let downstream_id = self.roles.get(downstream_role);

        let loss_kind = arena.get(upstream_id)?.loss_kind().ok_or_else(|| {
            CascadeGanError::Configuration(format!("Role {} was not compiled", upstream_role))
        })?;

        let trace = self.forward(arena, inputs)?;
        let (loss, grad_score) = loss_kind.evaluate(&trace.critic.output, targets)?;
        if !loss.is_finite() {
            return Ok(StepOutcome { loss, updated: Vec::new() });
        }

        let (critic_input_grads, critic_grads) =
            arena.get(self.roles.discriminator)?.backward(&trace.critic, &grad_score)?;
        let (grad_geometry, grad_topology) = (&critic_input_grads[0], &critic_input_grads[1]);
        let (grad_upstream_out, grad_downstream_out) = match self.rule {
            ConditioningRule::Mgd => (grad_topology, grad_geometry),
            ConditioningRule::Gmd => (grad_geometry, grad_topology),
        };

        let (downstream_input_grads, downstream_grads) =
            arena.get(downstream_id)?.backward(&trace.downstream, grad_downstream_out)?;
        // The conditional role's last input is the upstream output
        let mut grad_upstream = grad_upstream_out.clone();
        if let Some(through_downstream) = downstream_input_grads.last() {
            grad_upstream += through_downstream;
        }
        let (_, upstream_grads) =
            arena.get(upstream_id)?.backward(&trace.upstream, &grad_upstream)?;

        let updates: [(Role, ModelId, &Gradients); 3] = [
            (upstream_role, upstream_id, &upstream_grads),
            (downstream_role, downstream_id, &downstream_grads),
            (Role::Discriminator, self.roles.discriminator, &critic_grads),
        ];
        let mut updated = Vec::new();
        for (role, id, grads) in updates {
            if !freeze.contains(role) {
                arena.get_mut(id)?.apply_gradients(grads)?;
                updated.push(role);
            }
        }

        Ok(StepOutcome { loss, updated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{build_level, ArchitectureConfig, LevelShape, LossKind, Network, OptimizerSpec};
    use rand::SeedableRng;

    fn level(context_nodes: Option<usize>) -> (ModelArena, LevelRoles) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let shape = LevelShape { n_nodes: 5, context_nodes, noise_dim: 4 };
        let arch = ArchitectureConfig { generator_hidden: vec![8], discriminator_hidden: vec![8] };
        let nets = build_level(0, &shape, &arch, &mut rng).unwrap();

        let mut arena = ModelArena::new();
        let mut add = |mut net: crate::nn::Mlp, lr: f32| {
            net.compile(LossKind::Wasserstein, OptimizerSpec::Sgd { learning_rate: lr });
            arena.insert(Box::new(net))
        };
        let roles = LevelRoles {
            geometry: add(nets.geometry, 0.1),
            conditional_geometry: add(nets.conditional_geometry, 0.1),
            morphology: add(nets.morphology, 0.1),
            conditional_morphology: add(nets.conditional_morphology, 0.1),
            discriminator: add(nets.discriminator, 0.1),
        };
        (arena, roles)
    }

    fn weights(arena: &ModelArena, id: ModelId) -> Vec<f32> {
        let network = arena.get(id).unwrap();
        network.parameters().iter().flat_map(|t| t.iter().copied().collect::<Vec<_>>()).collect()
    }

    #[test]
    fn test_mgd_pairing() {
        let (arena, roles) = level(None);
        let stacked = StackedModel::compose(&arena, ConditioningRule::Mgd, roles, false).unwrap();
        let inputs = stacked.inputs(None, Array2::from_elem((3, 4), 0.3)).unwrap();

        let trace = stacked.forward(&arena, &inputs).unwrap();
        let topology = arena.get(roles.morphology).unwrap().predict(&inputs).unwrap();
        let geometry = arena
            .get(roles.conditional_geometry)
            .unwrap()
            .predict(&[inputs[0].clone(), topology.clone()])
            .unwrap();

        let flat = trace.sample.flat().unwrap();
        assert_eq!(flat[0], geometry);
        assert_eq!(flat[1], topology);
        assert_eq!(trace.critic.output.dim(), (3, 1));
        assert_eq!(stacked.sample(&arena, &inputs).unwrap(), trace.sample);
    }

    #[test]
    fn test_gmd_pairing() {
        let (arena, roles) = level(None);
        let stacked = StackedModel::compose(&arena, ConditioningRule::Gmd, roles, false).unwrap();
        let inputs = stacked.inputs(None, Array2::from_elem((2, 4), -0.2)).unwrap();

        let sample = stacked.sample(&arena, &inputs).unwrap();
        let geometry = arena.get(roles.geometry).unwrap().predict(&inputs).unwrap();
        let topology = arena
            .get(roles.conditional_morphology)
            .unwrap()
            .predict(&[inputs[0].clone(), geometry.clone()])
            .unwrap();

        let flat = sample.flat().unwrap();
        assert_eq!(flat[0], geometry);
        assert_eq!(flat[1], topology);
    }

    #[test]
    fn test_context_mismatch_is_rejected() {
        let (arena, roles) = level(Some(4));
        assert!(StackedModel::compose(&arena, ConditioningRule::Mgd, roles, false).is_err());
        let stacked = StackedModel::compose(&arena, ConditioningRule::Mgd, roles, true).unwrap();
        assert!(stacked.inputs(None, Array2::zeros((1, 4))).is_err());

        // Swapped roles do not fit the rule
        let swapped = LevelRoles { morphology: roles.geometry, ..roles };
        assert!(StackedModel::compose(&arena, ConditioningRule::Mgd, swapped, true).is_err());
    }

    #[test]
    fn test_frozen_roles_keep_their_weights() {
        let (mut arena, roles) = level(None);
        let stacked = StackedModel::compose(&arena, ConditioningRule::Mgd, roles, false).unwrap();
        let inputs = stacked.inputs(None, Array2::from_elem((4, 4), 0.5)).unwrap();
        let targets = LossKind::Wasserstein.real_labels(4);

        let critic_before = weights(&arena, roles.discriminator);
        let morphology_before = weights(&arena, roles.morphology);
        let geometry_before = weights(&arena, roles.conditional_geometry);

        let freeze = FreezeSet::empty().with(Role::Discriminator).with(Role::Morphology);
        let outcome = stacked.train_on_batch(&mut arena, &inputs, &targets, &freeze).unwrap();

        assert_eq!(outcome.updated, vec![Role::ConditionalGeometry]);
        assert_eq!(weights(&arena, roles.discriminator), critic_before);
        assert_eq!(weights(&arena, roles.morphology), morphology_before);
        assert_ne!(weights(&arena, roles.conditional_geometry), geometry_before);
    }

    #[test]
    fn test_generator_step_raises_critic_score() {
        let (mut arena, roles) = level(None);
        let stacked = StackedModel::compose(&arena, ConditioningRule::Gmd, roles, false).unwrap();
        let inputs = stacked.inputs(None, Array2::from_elem((4, 4), 0.5)).unwrap();
        let targets = LossKind::Wasserstein.real_labels(4);

        let before = stacked.predict(&arena, &inputs).unwrap().sum();
        let freeze = FreezeSet::empty().with(Role::Discriminator);
        let outcome = stacked.train_on_batch(&mut arena, &inputs, &targets, &freeze).unwrap();
        let after = stacked.predict(&arena, &inputs).unwrap().sum();

        assert_eq!(outcome.updated, vec![Role::Geometry, Role::ConditionalMorphology]);
        // Real label -1 under Wasserstein: the generators push the score up
        assert!(after > before);
    }
}
