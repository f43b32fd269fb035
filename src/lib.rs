//! # Cascade-GAN: hierarchical adversarial generation of trees
//!
//! This library trains a cascade of adversarial generators that synthesize
//! progressively larger trees. Every sample is a pair of node coordinates
//! (geometry) and a relaxed Prüfer code (topology), and every level of the
//! cascade is conditioned on the sample produced by the level below it.
//!
//! ## Features
//!
//! - **Orchestration**: level scheduling, critic/generator alternation and
//!   cross-level sample chaining
//! - **Factorization**: `mgd` and `gmd` composition of the geometry and
//!   morphology generators into one stacked model
//! - **Wasserstein critic**: weight clipping and a run-wide loss switch
//! - **Networks**: small dense networks behind the [`nn::Network`] seam
//! - **Codec**: Prüfer encoding, canonical reordering and SWC export

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Rooted trees and the topology codec
pub mod tree;

/// Network collaborators: layers, optimizers, losses and the model arena
pub mod nn;

/// Level-keyed training data
pub mod data;

/// The hierarchical training orchestrator
pub mod core;

/// Utility functions and helpers
pub mod utils;

// Re-export commonly used types
pub use tree::{Tree, TreeBuilder, PruferCodec, TopologyCodec};
pub use nn::{Network, Mlp, ModelArena, ModelId, LossKind, OptimizerSpec};
pub use data::{TrainingData, LevelData};
pub use crate::core::{
    TrainingConfig, ConditioningRule, LevelScheduler, RunSummary, SampleBatch, Reporter,
};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum CascadeGanError {
    /// Invalid configuration, rule, level ordering or data shape
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A batch slice ran past the available real samples
    #[error(
        "Batch {batch} of size {batch_size} exceeds the {available} samples stored under '{key}'"
    )]
    DataBounds {
        /// Data key of the level
        key: String,
        /// Requested batch index
        batch: usize,
        /// Requested batch size
        batch_size: usize,
        /// Number of samples available
        available: usize,
    },

    /// A loss became NaN or infinite
    #[error("Non-finite {phase} loss ({value}) at level {level}")]
    NumericInstability {
        /// Level being trained
        level: usize,
        /// Training phase that produced the loss
        phase: &'static str,
        /// Offending value
        value: f32,
    },

    /// A reporting collaborator failed
    #[error("Reporter failure: {0}")]
    Collaborator(String),

    /// Tensor shape mismatch
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Invalid tree structure or topology code
    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the library
pub type Result<T> = std::result::Result<T, CascadeGanError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        tree::{Tree, TreeBuilder, PruferCodec, TopologyCodec},
        nn::{Network, Mlp, ModelArena, ModelId, LossKind, OptimizerSpec},
        data::{TrainingData, LevelData},
        core::{
            TrainingConfig, ConditioningRule, LevelScheduler, RunSummary,
            SampleBatch, Reporter, Role, FreezeSet,
        },
        Result, CascadeGanError,
    };
}
