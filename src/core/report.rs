//! Progress reporting collaborators
//!
//! Reporters observe training but never steer it: a failing or panicking
//! reporter is logged and training continues.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};
use serde::Serialize;

use super::batch::SampleBatch;
use super::metrics::LevelMetrics;
use crate::tree::{reorder, to_swc, PruferCodec, SwcRow, TopologyCodec, Tree};
use crate::utils::save_json;
use crate::{CascadeGanError, Result};

/// Latest real/generated pair handed to [`Reporter::report`]
#[derive(Clone, Copy, Debug)]
pub struct Snapshot<'a> {
    /// Level index
    pub level: usize,
    /// Epoch within the level
    pub epoch: usize,
    /// Outer iteration within the epoch
    pub batch: usize,
    /// Latest real batch
    pub real: &'a SampleBatch,
    /// Latest generated batch
    pub generated: &'a SampleBatch,
    /// Latest critic loss
    pub critic_loss: Option<f32>,
    /// Latest generator loss
    pub generator_loss: Option<f32>,
}

/// Observer of the training run
pub trait Reporter {
    /// A level is about to train
    fn level_started(&mut self, _level: usize, _n_nodes: usize) -> Result<()> {
        Ok(())
    }

    /// The critic of `level` took a step
    fn critic_updated(&mut self, _level: usize, _loss: f32) -> Result<()> {
        Ok(())
    }

    /// The stacked model of `level` took a step
    fn generator_updated(&mut self, _level: usize, _loss: f32) -> Result<()> {
        Ok(())
    }

    /// Periodic snapshot
    fn report(&mut self, _snapshot: &Snapshot<'_>) -> Result<()> {
        Ok(())
    }

    /// A level finished training
    fn level_finished(&mut self, _metrics: &LevelMetrics) -> Result<()> {
        Ok(())
    }
}

/// Reporter that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Call a reporter hook, logging and swallowing failures and panics
pub(crate) fn notify<F>(reporter: &mut dyn Reporter, hook: &str, call: F)
where
    F: FnOnce(&mut dyn Reporter) -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(|| call(reporter))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(hook, error = %err, "reporter failed"),
        Err(_) => tracing::warn!(hook, "reporter panicked"),
    }
}

/// Harden one generated sample into a tree with parents before children
pub fn decode_sample(
    geometry: ArrayView2<'_, f32>,
    topology: ArrayView2<'_, f32>,
) -> Result<(Tree, Array2<f32>)> {
    let codec = PruferCodec;
    let tree = codec.decode(&codec.harden(topology))?;
    reorder(&tree, &geometry.to_owned())
}

fn first_swc(batch: &SampleBatch) -> Result<Vec<SwcRow>> {
    let (geometry, topology) = batch
        .item(0)
        .ok_or_else(|| CascadeGanError::Collaborator("Empty batch in snapshot".to_string()))?;
    let (tree, locations) = decode_sample(geometry.view(), topology.view())?;
    to_swc(&tree, &locations)
}

/// Reporter that logs losses and the shape of the first generated tree
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn level_started(&mut self, level: usize, n_nodes: usize) -> Result<()> {
        tracing::info!(level, n_nodes, "level started");
        Ok(())
    }

    fn report(&mut self, snapshot: &Snapshot<'_>) -> Result<()> {
        let (geometry, topology) = snapshot
            .generated
            .item(0)
            .ok_or_else(|| CascadeGanError::Collaborator("Empty batch in snapshot".to_string()))?;
        let (tree, _) = decode_sample(geometry.view(), topology.view())?;

        tracing::info!(
            level = snapshot.level,
            epoch = snapshot.epoch,
            batch = snapshot.batch,
            critic_loss = snapshot.critic_loss.unwrap_or(f32::NAN),
            generator_loss = snapshot.generator_loss.unwrap_or(f32::NAN),
            depth = tree.max_depth(),
            leaves = tree.leaf_count(),
            branches = tree.branch_count(),
            "snapshot"
        );
        Ok(())
    }

    fn level_finished(&mut self, metrics: &LevelMetrics) -> Result<()> {
        tracing::info!(
            level = metrics.level,
            critic_updates = metrics.critic_updates,
            generator_updates = metrics.generator_updates,
            seconds = metrics.total_time.as_secs_f32(),
            "level finished"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotFile {
    level: usize,
    epoch: usize,
    batch: usize,
    critic_loss: Option<f32>,
    generator_loss: Option<f32>,
    real: Vec<SwcRow>,
    generated: Vec<SwcRow>,
}

/// Reporter writing the first real and generated tree of every snapshot as SWC rows in JSON
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    directory: PathBuf,
    written: Vec<PathBuf>,
}

impl SnapshotWriter {
    /// Write into `directory`, creating it when needed
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(SnapshotWriter { directory, written: Vec::new() })
    }

    /// Files written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Reporter for SnapshotWriter {
    fn report(&mut self, snapshot: &Snapshot<'_>) -> Result<()> {
        let file = SnapshotFile {
            level: snapshot.level,
            epoch: snapshot.epoch,
            batch: snapshot.batch,
            critic_loss: snapshot.critic_loss,
            generator_loss: snapshot.generator_loss,
            real: first_swc(snapshot.real)?,
            generated: first_swc(snapshot.generated)?,
        };
        let path = self.directory.join(format!(
            "level{}_epoch{}_batch{}.json",
            snapshot.level, snapshot.epoch, snapshot.batch
        ));
        save_json(&file, &path)?;
        self.written.push(path);
        Ok(())
    }

    fn level_finished(&mut self, metrics: &LevelMetrics) -> Result<()> {
        let path = self.directory.join(format!("level{}_metrics.json", metrics.level));
        save_json(metrics, &path)?;
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    struct Failing;

    impl Reporter for Failing {
        fn critic_updated(&mut self, _level: usize, _loss: f32) -> Result<()> {
            Err(CascadeGanError::Collaborator("disk full".to_string()))
        }

        fn generator_updated(&mut self, _level: usize, _loss: f32) -> Result<()> {
            panic!("reporter bug");
        }
    }

    fn batch() -> SampleBatch {
        let codec = PruferCodec;
        let mut topology = Array3::zeros((1, 3, 5));
        topology.slice_mut(ndarray::s![0, .., ..]).assign(&codec.one_hot(&[0, 0, 3], 5).unwrap());
        SampleBatch {
            geometry: Array3::from_shape_fn((1, 4, 3), |(_, i, _)| i as f32),
            topology,
        }
    }

    #[test]
    fn test_failures_are_swallowed() {
        let mut reporter = Failing;
        notify(&mut reporter, "critic_updated", |r| r.critic_updated(0, 1.0));
        notify(&mut reporter, "generator_updated", |r| r.generator_updated(0, 1.0));
    }

    #[test]
    fn test_decode_sample() {
        let sample = batch();
        let (geometry, topology) = sample.item(0).unwrap();
        let (tree, locations) = decode_sample(geometry.view(), topology.view()).unwrap();

        assert_eq!(tree.size(), 5);
        assert_eq!(locations.dim(), (4, 3));
        for (node, parent) in tree.parents().iter().enumerate().skip(1) {
            assert!(parent.unwrap() < node);
        }
    }

    #[test]
    fn test_snapshot_writer() {
        let dir = std::env::temp_dir().join("cascade_gan_snapshot_test");
        let mut writer = SnapshotWriter::new(&dir).unwrap();
        let sample = batch();
        let snapshot = Snapshot {
            level: 0,
            epoch: 1,
            batch: 25,
            real: &sample,
            generated: &sample,
            critic_loss: Some(0.5),
            generator_loss: None,
        };

        writer.report(&snapshot).unwrap();
        assert_eq!(writer.written().len(), 1);
        let value: serde_json::Value = crate::utils::load_json(&writer.written()[0]).unwrap();
        assert_eq!(value["generated"].as_array().unwrap().len(), 5);
        assert_eq!(value["real"][0]["parent"], -1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
