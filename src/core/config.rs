//! Run configuration

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::nn::{ArchitectureConfig, LossKind, OptimizerSpec};
use crate::utils::{load_json, save_json};
use crate::{CascadeGanError, Result};

/// Factorization of a sample into two generator roles
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditioningRule {
    /// Morphology first, geometry conditioned on it
    #[default]
    Mgd,
    /// Geometry first, morphology conditioned on it
    Gmd,
}

impl FromStr for ConditioningRule {
    type Err = CascadeGanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mgd" => Ok(ConditioningRule::Mgd),
            "gmd" => Ok(ConditioningRule::Gmd),
            other => Err(CascadeGanError::Configuration(format!(
                "Unknown conditioning rule '{}', expected 'mgd' or 'gmd'", other
            ))),
        }
    }
}

impl fmt::Display for ConditioningRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditioningRule::Mgd => write!(f, "mgd"),
            ConditioningRule::Gmd => write!(f, "gmd"),
        }
    }
}

/// Training configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of cascade levels
    pub n_levels: usize,
    /// Nodes per tree at each level, strictly increasing
    pub n_nodes: Vec<usize>,
    /// Width of the generator noise input
    pub noise_dim: usize,
    /// Epochs per level
    pub epochs: usize,
    /// Samples per batch
    pub batch_size: usize,
    /// Outer iterations per epoch
    pub batches_per_epoch: usize,
    /// Critic updates per outer iteration
    pub d_iters: usize,
    /// Critic learning rate
    pub lr_discriminator: f32,
    /// Generator learning rate
    pub lr_generator: f32,
    /// Inclusive clipping bounds `[low, high]` for critic weights
    pub weight_constraint: [f32; 2],
    /// Factorization rule
    pub rule: ConditioningRule,
    /// Alternate which generator role is trained
    pub alternate_generators: bool,
    /// Period of the alternation in outer iterations
    pub alternation_cycle: usize,
    /// Adversarial objective for every level
    pub loss: LossKind,
    /// Optimizer family; learning rates are taken from the fields above
    pub optimizer: OptimizerSpec,
    /// Report cadence in outer iterations, firing on batch 0 and every multiple;
    /// 0 disables reports
    pub report_every: usize,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Hidden layer widths
    pub architecture: ArchitectureConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            n_levels: 3,
            n_nodes: vec![10, 20, 40],
            noise_dim: 100,
            epochs: 25,
            batch_size: 64,
            batches_per_epoch: 100,
            d_iters: 20,
            lr_discriminator: 0.005,
            lr_generator: 0.00005,
            weight_constraint: [-0.01, 0.01],
            rule: ConditioningRule::Mgd,
            alternate_generators: false,
            alternation_cycle: 20,
            loss: LossKind::Wasserstein,
            optimizer: OptimizerSpec::default(),
            report_every: 25,
            seed: Some(42),
            architecture: ArchitectureConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Small configuration for quick experiments on the given tree sizes
    pub fn quick(n_nodes: Vec<usize>) -> Self {
        TrainingConfig {
            n_levels: n_nodes.len(),
            n_nodes,
            noise_dim: 8,
            epochs: 1,
            batch_size: 4,
            batches_per_epoch: 2,
            d_iters: 1,
            architecture: ArchitectureConfig {
                generator_hidden: vec![16],
                discriminator_hidden: vec![16],
            },
            ..Self::default()
        }
    }

    /// Check every field; the first violation is reported
    pub fn validate(&self) -> Result<()> {
        fn fail(msg: String) -> Result<()> {
            Err(CascadeGanError::Configuration(msg))
        }

        if self.n_levels == 0 {
            return fail("At least one level is required".to_string());
        }
        if self.n_nodes.len() != self.n_levels {
            return fail(format!(
                "{} tree sizes given for {} levels", self.n_nodes.len(), self.n_levels
            ));
        }
        if let Some(&n) = self.n_nodes.iter().find(|&&n| n < 3) {
            return fail(format!("Trees need at least 3 nodes, got {}", n));
        }
        if self.n_nodes.windows(2).any(|w| w[0] >= w[1]) {
            return fail(format!("Tree sizes {:?} must be strictly increasing", self.n_nodes));
        }
        if self.noise_dim == 0 || self.batch_size == 0 {
            return fail("Noise width and batch size must be positive".to_string());
        }
        if self.epochs == 0 || self.batches_per_epoch == 0 || self.d_iters == 0 {
            return fail(
                "Epochs, batches per epoch and critic iterations must be positive".to_string(),
            );
        }
        let [low, high] = self.weight_constraint;
        if !low.is_finite() || !high.is_finite() || low > high {
            return fail(format!("Invalid weight constraint [{}, {}]", low, high));
        }
        if self.alternate_generators && self.alternation_cycle < 2 {
            return fail("Alternation cycle must be at least 2".to_string());
        }
        self.discriminator_optimizer().validate().map_err(CascadeGanError::Configuration)?;
        self.generator_optimizer().validate().map_err(CascadeGanError::Configuration)?;
        Ok(())
    }

    /// Optimizer of the critics
    pub fn discriminator_optimizer(&self) -> OptimizerSpec {
        self.optimizer.with_learning_rate(self.lr_discriminator)
    }

    /// Optimizer of the stacked generator models
    pub fn generator_optimizer(&self) -> OptimizerSpec {
        self.optimizer.with_learning_rate(self.lr_generator)
    }

    /// Real samples consumed per level
    pub fn samples_required(&self) -> usize {
        self.batches_per_epoch * self.batch_size
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: TrainingConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }
}
