//! Network collaborators: dense layers, optimizers, losses and the model arena

mod dense;
mod loss;
mod optimizer;
mod network;
mod arena;
mod builders;

pub use dense::{Activation, Dense};
pub use loss::{LossKind, sigmoid};
pub use optimizer::OptimizerSpec;
pub use network::{Network, Mlp, Head, Trace, Gradients};
pub use arena::{ModelArena, ModelId};
pub use builders::{
    ArchitectureConfig, LevelShape, LevelNetworks, build_level, geometry_width, topology_width,
};
