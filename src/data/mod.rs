//! Level-keyed training data
//!
//! Real samples are stored per tree size under the key `"n{count}"`: node
//! coordinates of every non-root node and the Prüfer code of the topology.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array2, Array3};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Serialize, Deserialize};

use crate::tree::{PruferCodec, TopologyCodec};
use crate::utils::{load_json, random_tree, save_json};
use crate::{CascadeGanError, Result};

/// Real samples of one tree size
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelData {
    /// Coordinates `(samples, n - 1, 3)`, row `i - 1` holds node `i`
    pub geometry: Array3<f32>,
    /// Prüfer codes `(samples, n - 2)`
    pub morphology: Array2<usize>,
}

impl LevelData {
    /// Number of stored samples
    pub fn samples(&self) -> usize {
        self.geometry.dim().0
    }

    fn validate(&self, key: &str, n_nodes: usize) -> Result<()> {
        let (samples, rows, dims) = self.geometry.dim();
        if rows + 1 != n_nodes || dims != 3 {
            return Err(CascadeGanError::Configuration(format!(
                "Geometry under '{}' has shape {:?}, expected (_, {}, 3)",
                key, self.geometry.dim(), n_nodes - 1
            )));
        }
        if self.morphology.dim() != (samples, n_nodes - 2) {
            return Err(CascadeGanError::Configuration(format!(
                "Morphology under '{}' has shape {:?}, expected ({}, {})",
                key, self.morphology.dim(), samples, n_nodes - 2
            )));
        }
        if let Some(&label) = self.morphology.iter().find(|&&label| label >= n_nodes) {
            return Err(CascadeGanError::Configuration(format!(
                "Morphology under '{}' contains label {} for {} nodes", key, label, n_nodes
            )));
        }
        if self.geometry.iter().any(|v| !v.is_finite()) {
            return Err(CascadeGanError::Configuration(format!(
                "Geometry under '{}' contains non-finite coordinates", key
            )));
        }
        Ok(())
    }
}

/// Real samples for every level of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    levels: HashMap<String, LevelData>,
}

impl TrainingData {
    /// Empty data set
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage key of a tree size
    pub fn key(n_nodes: usize) -> String {
        format!("n{}", n_nodes)
    }

    /// Store the samples of a tree size, replacing earlier ones
    pub fn insert(&mut self, n_nodes: usize, data: LevelData) {
        self.levels.insert(Self::key(n_nodes), data);
    }

    /// Samples of a tree size
    pub fn level(&self, n_nodes: usize) -> Result<&LevelData> {
        let key = Self::key(n_nodes);
        self.levels
            .get(&key)
            .ok_or_else(|| {
                CascadeGanError::Configuration(format!("No training data under '{}'", key))
            })
    }

    /// Check that every requested tree size is present with consistent shapes
    pub fn validate(&self, n_nodes: &[usize]) -> Result<()> {
        for &n in n_nodes {
            if n < 3 {
                return Err(CascadeGanError::Configuration(format!(
                    "Trees need at least 3 nodes, got {}", n
                )));
            }
            self.level(n)?.validate(&Self::key(n), n)?;
        }
        Ok(())
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }

    /// Random labelled trees whose nodes take a Gaussian step away from their parent
    pub fn synthetic<R: Rng>(n_nodes: &[usize], samples: usize, rng: &mut R) -> Result<Self> {
        let step = Normal::new(0.0f32, 1.0)
            .map_err(|e| CascadeGanError::Configuration(e.to_string()))?;
        let mut data = TrainingData::new();

        for &n in n_nodes {
            if n < 3 {
                return Err(CascadeGanError::Configuration(format!(
                    "Trees need at least 3 nodes, got {}", n
                )));
            }

            let mut geometry = Array3::zeros((samples, n - 1, 3));
            let mut morphology = Array2::zeros((samples, n - 2));
            for s in 0..samples {
                let tree = random_tree(n, rng)?;
                let code = PruferCodec.encode(&tree)?;
                for (position, label) in code.into_iter().enumerate() {
                    morphology[(s, position)] = label;
                }

                // Parents precede children, so every parent is placed first
                let mut locations = vec![[0.0f32; 3]; n];
                for node in 1..n {
                    let parent = tree.parent(node).unwrap_or(0);
                    for d in 0..3 {
                        locations[node][d] = locations[parent][d] + step.sample(rng);
                        geometry[(s, node - 1, d)] = locations[node][d];
                    }
                }
            }

            data.insert(n, LevelData { geometry, morphology });
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_synthetic_data_validates() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let data = TrainingData::synthetic(&[4, 7], 10, &mut rng).unwrap();

        data.validate(&[4, 7]).unwrap();
        assert_eq!(data.level(7).unwrap().samples(), 10);
        assert_eq!(data.level(7).unwrap().morphology.dim(), (10, 5));
        assert!(data.validate(&[5]).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut data = TrainingData::new();
        data.insert(5, LevelData {
            geometry: Array3::zeros((2, 3, 3)),
            morphology: Array2::zeros((2, 3)),
        });
        assert!(data.validate(&[5]).is_err());

        data.insert(5, LevelData {
            geometry: Array3::zeros((2, 4, 3)),
            morphology: Array2::from_elem((2, 3), 9),
        });
        assert!(data.validate(&[5]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let data = TrainingData::synthetic(&[3], 2, &mut rng).unwrap();
        let path = std::env::temp_dir().join("cascade_gan_test_data.json");

        data.save(&path).unwrap();
        assert_eq!(TrainingData::load(&path).unwrap(), data);

        std::fs::remove_file(&path).ok();
    }
}
