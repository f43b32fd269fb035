//! Rooted trees and the codec between trees and topology codes

mod rooted;
mod codec;

pub use rooted::{Tree, TreeBuilder};
pub use codec::{TopologyCodec, PruferCodec, SwcRow, reorder, to_swc};
