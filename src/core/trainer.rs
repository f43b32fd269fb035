//! Adversarial training loop of a single level
//!
//! Every outer iteration runs `d_iters` critic updates, one stacked generator
//! update and a housekeeping step. The loop is an explicit state machine over
//! [`Phase`], so the position within a level is always observable.

use tracing::{debug, info, info_span};

use super::batch::{BatchChainer, CriticBatch, SampleBatch};
use super::composer::StackedModel;
use super::config::TrainingConfig;
use super::constraint::clip;
use super::metrics::LevelMetrics;
use super::report::{notify, Reporter, Snapshot};
use super::roles::{AlternationSchedule, FreezeSet};
use crate::data::TrainingData;
use crate::nn::ModelArena;
use crate::utils::timing::Timer;
use crate::{CascadeGanError, Result};

/// Position inside the training loop of a level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Critic update number `iteration` of the current outer iteration
    Critic {
        /// Zero-based critic iteration
        iteration: usize,
    },
    /// The single generator update of the current outer iteration
    Generator,
    /// Counters, logging and periodic reports
    Housekeeping,
    /// All epochs completed
    Done,
}

/// Everything a level's training loop reads and mutates
pub struct LevelResources<'r> {
    /// Owner of every network
    pub arena: &'r mut ModelArena,
    /// Stacked models of all levels trained so far, including this one
    pub models: &'r [StackedModel],
    /// Real samples
    pub data: &'r TrainingData,
    /// Noise and generated chains
    pub chainer: &'r mut BatchChainer,
    /// Progress observer
    pub reporter: &'r mut dyn Reporter,
}

/// Runs the critic/generator alternation for one level
#[derive(Clone, Copy, Debug)]
pub struct AdversarialTrainer<'a> {
    config: &'a TrainingConfig,
    schedule: Option<AlternationSchedule>,
}

struct LevelState {
    level: usize,
    epoch: usize,
    batch: usize,
    phase: Phase,
    critic_loss: Option<f32>,
    generator_loss: Option<f32>,
    latest: Option<(SampleBatch, SampleBatch)>,
    metrics: LevelMetrics,
}

impl<'a> AdversarialTrainer<'a> {
    /// Trainer for a validated configuration
    pub fn new(config: &'a TrainingConfig) -> Self {
        let schedule = config
            .alternate_generators
            .then(|| AlternationSchedule::new(config.alternation_cycle));
        AdversarialTrainer { config, schedule }
    }

    /// Train `level` for the configured number of epochs
    pub fn train_level(&self, level: usize, resources: LevelResources<'_>) -> Result<LevelMetrics> {
        let model = *resources.models.get(level).ok_or_else(|| {
            CascadeGanError::Configuration(format!("No stacked model for level {}", level))
        })?;
        let n_nodes = model.n_nodes();

        let span = info_span!("level", level, n_nodes);
        let _enter = span.enter();
        let timer = Timer::new(&format!("level {}", level));

        let LevelResources { arena, models, data, chainer, reporter } = resources;
        notify(reporter, "level_started", |r| r.level_started(level, n_nodes));

        let mut state = LevelState {
            level,
            epoch: 0,
            batch: 0,
            phase: Phase::Critic { iteration: 0 },
            critic_loss: None,
            generator_loss: None,
            latest: None,
            metrics: LevelMetrics::new(level, n_nodes),
        };

        while state.phase != Phase::Done {
            state.phase = match state.phase {
                Phase::Critic { iteration } => {
                    self.critic_step(&mut state, &model, arena, models, data, chainer, reporter)?;
                    if iteration + 1 < self.config.d_iters {
                        Phase::Critic { iteration: iteration + 1 }
                    } else {
                        Phase::Generator
                    }
                }
                Phase::Generator => {
                    self.generator_step(&mut state, &model, arena, models, chainer, reporter)?;
                    Phase::Housekeeping
                }
                Phase::Housekeeping => self.housekeeping(&mut state, reporter),
                Phase::Done => Phase::Done,
            };
        }

        // Hand back a critic that satisfies the constraint
        clip(arena.get_mut(model.roles().discriminator)?, self.config.weight_constraint);

        let mut metrics = state.metrics;
        metrics.total_time = timer.elapsed();
        info!(
            critic_updates = metrics.critic_updates,
            generator_updates = metrics.generator_updates,
            seconds = metrics.total_time.as_secs_f32(),
            "level trained"
        );
        notify(reporter, "level_finished", |r| r.level_finished(&metrics));
        Ok(metrics)
    }

    #[allow(clippy::too_many_arguments)]
    fn critic_step(
        &self,
        state: &mut LevelState,
        model: &StackedModel,
        arena: &mut ModelArena,
        models: &[StackedModel],
        data: &TrainingData,
        chainer: &mut BatchChainer,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let critic_id = model.roles().discriminator;
        let batch_size = self.config.batch_size;

        clip(arena.get_mut(critic_id)?, self.config.weight_constraint);

        let real = chainer.real_batch(data, state.level, state.batch, batch_size)?;
        let generated = chainer.generated_batch(arena, models, state.level, batch_size)?;
        let critic_batch = CriticBatch::assemble(&real, &generated, self.config.loss)?;

        let loss = arena
            .get_mut(critic_id)?
            .train_on_batch(&critic_batch.samples.flat()?, &critic_batch.labels)?;
        if !loss.is_finite() {
            return Err(CascadeGanError::NumericInstability {
                level: state.level,
                phase: "critic",
                value: loss,
            });
        }

        state.metrics.record_critic(loss);
        state.critic_loss = Some(loss);
        state.latest = Some((real, generated));
        notify(reporter, "critic_updated", |r| r.critic_updated(state.level, loss));
        Ok(())
    }

    fn generator_step(
        &self,
        state: &mut LevelState,
        model: &StackedModel,
        arena: &mut ModelArena,
        models: &[StackedModel],
        chainer: &mut BatchChainer,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let batch_size = self.config.batch_size;
        let freeze = FreezeSet::generator_phase(self.config.rule, self.schedule, state.batch);

        let inputs = chainer.generator_inputs(arena, models, state.level, batch_size)?;
        let targets = self.config.loss.real_labels(batch_size);
        let outcome = model.train_on_batch(arena, &inputs, &targets, &freeze)?;
        if !outcome.loss.is_finite() {
            return Err(CascadeGanError::NumericInstability {
                level: state.level,
                phase: "generator",
                value: outcome.loss,
            });
        }

        state.metrics.record_generator(outcome.loss);
        state.generator_loss = Some(outcome.loss);
        notify(reporter, "generator_updated", |r| r.generator_updated(state.level, outcome.loss));
        Ok(())
    }

    fn housekeeping(&self, state: &mut LevelState, reporter: &mut dyn Reporter) -> Phase {
        debug!(
            epoch = state.epoch,
            batch = state.batch,
            critic_loss = state.critic_loss.unwrap_or(f32::NAN),
            generator_loss = state.generator_loss.unwrap_or(f32::NAN),
            "batch done"
        );

        let report_every = self.config.report_every;
        if report_every > 0 && state.batch % report_every == 0 {
            if let Some((real, generated)) = &state.latest {
                let snapshot = Snapshot {
                    level: state.level,
                    epoch: state.epoch,
                    batch: state.batch,
                    real,
                    generated,
                    critic_loss: state.critic_loss,
                    generator_loss: state.generator_loss,
                };
                notify(reporter, "report", |r| r.report(&snapshot));
            }
        }

        state.batch += 1;
        if state.batch < self.config.batches_per_epoch {
            return Phase::Critic { iteration: 0 };
        }

        let window = self.config.batches_per_epoch;
        info!(
            epoch = state.epoch,
            critic_loss = state.metrics.recent_critic_loss(window).unwrap_or(f32::NAN),
            generator_loss = state.metrics.recent_generator_loss(window).unwrap_or(f32::NAN),
            "epoch done"
        );
        state.metrics.epochs_completed += 1;
        state.batch = 0;
        state.epoch += 1;
        if state.epoch < self.config.epochs {
            Phase::Critic { iteration: 0 }
        } else {
            Phase::Done
        }
    }
}
