//! Utility functions for cascade-gan

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use once_cell::sync::OnceCell;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::tree::Tree;
use crate::{CascadeGanError, Result};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install a global `tracing` subscriber writing formatted events to stderr
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Later calls are
/// no-ops, as is the first call when another subscriber is already installed.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init();
    });
}

/// Save object to JSON file
pub fn save_json<T: Serialize>(obj: &T, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, obj)?;
    writer.flush()?;
    Ok(())
}

/// Load object from JSON file
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Generate a random labelled tree of given size
///
/// Every node picks its parent among the nodes before it, so node 0 is the
/// root and parents always precede their children.
pub fn random_tree<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Result<Tree> {
    if size == 0 {
        return Err(CascadeGanError::InvalidTree("Cannot create tree with 0 nodes".to_string()));
    }

    let mut children = vec![Vec::new(); size];
    for node in 1..size {
        let parent = rng.gen_range(0..node);
        children[parent].push(node);
    }

    Tree::from_adjacency(children)
}

/// Timing utilities
pub mod timing {
    use std::time::{Duration, Instant};

    /// Simple timer that logs its lifetime at debug level
    pub struct Timer {
        start: Instant,
        name: String,
    }

    impl Timer {
        /// Start new timer
        pub fn new(name: &str) -> Self {
            Timer {
                start: Instant::now(),
                name: name.to_string(),
            }
        }

        /// Get elapsed time
        pub fn elapsed(&self) -> Duration {
            self.start.elapsed()
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            let seconds = self.elapsed().as_secs_f32();
            tracing::debug!(timer = %self.name, seconds, "timer finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_random_tree() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for size in 1..=5 {
            let tree = random_tree(size, &mut rng).unwrap();
            assert_eq!(tree.size(), size);
        }
        assert!(random_tree(0, &mut rng).is_err());
    }

    #[test]
    fn test_json_serialization() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let tree = random_tree(4, &mut rng).unwrap();
        let path = std::env::temp_dir().join("cascade_gan_test_tree.json");

        save_json(&tree, &path).unwrap();
        let loaded: Tree = load_json(&path).unwrap();

        assert_eq!(tree, loaded);

        // Clean up
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
