//! Level-by-level scheduling of the cascade

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use super::batch::{BatchChainer, SampleBatch};
use super::composer::{LevelRoles, StackedModel};
use super::config::TrainingConfig;
use super::metrics::{LevelMetrics, RunSummary};
use super::report::Reporter;
use super::trainer::{AdversarialTrainer, LevelResources};
use crate::data::TrainingData;
use crate::nn::{build_level, LevelShape, ModelArena, Network};
use crate::utils::timing::Timer;
use crate::{CascadeGanError, Result};

/// One level of the cascade
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Level {
    /// Level index
    pub index: usize,
    /// Nodes per generated tree
    pub n_nodes: usize,
    /// Nodes per tree of the conditioning level, `None` at level 0
    pub context_nodes: Option<usize>,
    /// Arena ids of the level's networks
    pub roles: LevelRoles,
    /// The level's generator pair and critic
    pub stacked: StackedModel,
}

/// Owner of every network and the driver of level-by-level training
///
/// Levels train strictly in order: level `l` reads samples generated by the
/// already trained levels `0..l`.
pub struct LevelScheduler {
    config: TrainingConfig,
    data: TrainingData,
    arena: ModelArena,
    levels: Vec<Level>,
    chainer: BatchChainer,
    metrics: Vec<LevelMetrics>,
}

impl LevelScheduler {
    /// Validate the inputs and build and compile every level
    pub fn new(config: TrainingConfig, data: TrainingData) -> Result<Self> {
        config.validate()?;
        data.validate(&config.n_nodes)?;
        for &n in &config.n_nodes {
            let available = data.level(n)?.samples();
            if available < config.samples_required() {
                return Err(CascadeGanError::DataBounds {
                    key: TrainingData::key(n),
                    batch: config.batches_per_epoch - 1,
                    batch_size: config.batch_size,
                    available,
                });
            }
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut arena = ModelArena::new();
        let mut levels = Vec::with_capacity(config.n_levels);

        for (index, &n_nodes) in config.n_nodes.iter().enumerate() {
            let context_nodes = index.checked_sub(1).map(|prev| config.n_nodes[prev]);
            let shape = LevelShape { n_nodes, context_nodes, noise_dim: config.noise_dim };
            let nets = build_level(index, &shape, &config.architecture, &mut rng)?;

            let generator_optimizer = config.generator_optimizer();
            let mut add = |mut net: crate::nn::Mlp, critic: bool| {
                let optimizer = if critic {
                    config.discriminator_optimizer()
                } else {
                    generator_optimizer
                };
                net.compile(config.loss, optimizer);
                arena.insert(Box::new(net))
            };
            let roles = LevelRoles {
                geometry: add(nets.geometry, false),
                conditional_geometry: add(nets.conditional_geometry, false),
                morphology: add(nets.morphology, false),
                conditional_morphology: add(nets.conditional_morphology, false),
                discriminator: add(nets.discriminator, true),
            };
            let stacked =
                StackedModel::compose(&arena, config.rule, roles, context_nodes.is_some())?;

            levels.push(Level { index, n_nodes, context_nodes, roles, stacked });
        }

        info!(
            levels = levels.len(),
            networks = arena.len(),
            parameters = arena.iter().map(|(_, n)| n.num_parameters()).sum::<usize>(),
            rule = %config.rule,
            "cascade built"
        );

        let chainer = BatchChainer::new(
            config.n_nodes.clone(),
            config.noise_dim,
            config.seed.map(|s| s.wrapping_add(1)),
        );
        Ok(LevelScheduler { config, data, arena, levels, chainer, metrics: Vec::new() })
    }

    /// Train every remaining level in order
    pub fn run(&mut self, reporter: &mut dyn Reporter) -> Result<RunSummary> {
        let timer = Timer::new("run");
        for level in self.metrics.len()..self.levels.len() {
            self.train_level(level, reporter)?;
        }
        Ok(RunSummary { levels: self.metrics.clone(), total_time: timer.elapsed() })
    }

    /// Train one level; only the next untrained level may be trained
    pub fn train_level(
        &mut self,
        level: usize,
        reporter: &mut dyn Reporter,
    ) -> Result<&LevelMetrics> {
        let next = self.metrics.len();
        if level != next {
            return Err(CascadeGanError::Configuration(format!(
                "Level {} cannot train now, the next level to train is {}",
                level, next
            )));
        }
        if level >= self.levels.len() {
            return Err(CascadeGanError::Configuration(format!(
                "Level {} does not exist, the cascade has {} levels",
                level,
                self.levels.len()
            )));
        }

        let models: Vec<StackedModel> = self.levels[..=level].iter().map(|l| l.stacked).collect();
        let trainer = AdversarialTrainer::new(&self.config);
        let metrics = trainer.train_level(
            level,
            LevelResources {
                arena: &mut self.arena,
                models: &models,
                data: &self.data,
                chainer: &mut self.chainer,
                reporter,
            },
        )?;

        self.metrics.push(metrics);
        Ok(&self.metrics[level])
    }

    /// Generate `batch_size` samples of `level` by chaining all levels below it
    pub fn sample(&mut self, level: usize, batch_size: usize) -> Result<SampleBatch> {
        let models: Vec<StackedModel> = self.levels.iter().map(|l| l.stacked).collect();
        self.chainer.generated_batch(&self.arena, &models, level, batch_size)
    }

    /// Configuration of the run
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// All levels
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Owner of every network
    pub fn arena(&self) -> &ModelArena {
        &self.arena
    }

    /// Mutable access to every network
    pub fn arena_mut(&mut self) -> &mut ModelArena {
        &mut self.arena
    }

    /// Metrics of the levels trained so far
    pub fn metrics(&self) -> &[LevelMetrics] {
        &self.metrics
    }

    /// Generated batches drawn per level so far
    pub fn samples_drawn(&self) -> &[usize] {
        self.chainer.samples_drawn()
    }
}
