//! Hierarchical training orchestration: configuration, composition, batching and scheduling

mod config;
mod constraint;
mod roles;
mod composer;
mod batch;
mod metrics;
mod report;
mod trainer;
mod scheduler;

pub use config::{TrainingConfig, ConditioningRule};
pub use constraint::{clip, within_bounds};
pub use roles::{Role, FreezeSet, AlternationSchedule};
pub use composer::{LevelRoles, StackedModel, StackedTrace, StepOutcome};
pub use batch::{SampleBatch, CriticBatch, BatchChainer};
pub use metrics::{LevelMetrics, RunSummary};
pub use report::{Reporter, Snapshot, NullReporter, TracingReporter, SnapshotWriter, decode_sample};
pub use trainer::{AdversarialTrainer, LevelResources, Phase};
pub use scheduler::{LevelScheduler, Level};
