//! Owner of every network in a run

use std::fmt;

use super::network::Network;
use crate::{CascadeGanError, Result};

/// Handle to a network stored in a [`ModelArena`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(usize);

impl ModelId {
    /// Position inside the arena
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of networks referenced by [`ModelId`]
///
/// Stacked models and the scheduler hold ids instead of references, so a
/// level's trained networks can feed the next level without shared ownership.
#[derive(Default)]
pub struct ModelArena {
    networks: Vec<Box<dyn Network>>,
}

impl ModelArena {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a network and return its id
    pub fn insert(&mut self, network: Box<dyn Network>) -> ModelId {
        self.networks.push(network);
        ModelId(self.networks.len() - 1)
    }

    /// Borrow a network
    pub fn get(&self, id: ModelId) -> Result<&dyn Network> {
        self.networks
            .get(id.0)
            .map(|n| n.as_ref())
            .ok_or_else(|| CascadeGanError::Configuration(format!("Unknown model {}", id)))
    }

    /// Mutably borrow a network
    pub fn get_mut(&mut self, id: ModelId) -> Result<&mut (dyn Network + 'static)> {
        match self.networks.get_mut(id.0) {
            Some(network) => Ok(network.as_mut()),
            None => Err(CascadeGanError::Configuration(format!("Unknown model {}", id))),
        }
    }

    /// Number of stored networks
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Iterate over `(id, network)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &dyn Network)> {
        self.networks.iter().enumerate().map(|(i, n)| (ModelId(i), n.as_ref()))
    }
}

impl fmt::Debug for ModelArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.networks.iter().map(|n| n.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Head, Mlp};
    use rand::SeedableRng;

    #[test]
    fn test_insert_and_lookup() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut arena = ModelArena::new();
        let a = Mlp::new("a", vec![2], &[], 1, Head::Linear, &mut rng).unwrap();
        let b = Mlp::new("b", vec![3], &[], 1, Head::Linear, &mut rng).unwrap();
        let a = arena.insert(Box::new(a));
        let b = arena.insert(Box::new(b));

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).unwrap().name(), "a");
        assert_eq!(arena.get_mut(b).unwrap().input_dims(), &[3]);
        assert!(arena.get(ModelId(9)).is_err());
    }
}
