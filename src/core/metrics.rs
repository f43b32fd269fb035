//! Training metrics per level and per run

use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Loss traces and update counters of one level
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LevelMetrics {
    /// Level index
    pub level: usize,
    /// Nodes per tree
    pub n_nodes: usize,
    /// Critic loss after every critic update
    pub critic_loss: Vec<f32>,
    /// Stacked-model loss after every generator update
    pub generator_loss: Vec<f32>,
    /// Number of critic updates
    pub critic_updates: usize,
    /// Number of generator updates
    pub generator_updates: usize,
    /// Completed epochs
    pub epochs_completed: usize,
    /// Total training time
    pub total_time: Duration,
}

impl LevelMetrics {
    /// Create new metrics tracker
    pub fn new(level: usize, n_nodes: usize) -> Self {
        LevelMetrics { level, n_nodes, ..Self::default() }
    }

    /// Record a critic update
    pub fn record_critic(&mut self, loss: f32) {
        self.critic_loss.push(loss);
        self.critic_updates += 1;
    }

    /// Record a generator update
    pub fn record_generator(&mut self, loss: f32) {
        self.generator_loss.push(loss);
        self.generator_updates += 1;
    }

    /// Mean of the last `window` critic losses
    pub fn recent_critic_loss(&self, window: usize) -> Option<f32> {
        recent_mean(&self.critic_loss, window)
    }

    /// Mean of the last `window` generator losses
    pub fn recent_generator_loss(&self, window: usize) -> Option<f32> {
        recent_mean(&self.generator_loss, window)
    }

    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "Level {} ({} nodes): {} epochs, {} critic / {} generator updates in {:.2}s\nFinal critic loss: {:.4}\nFinal generator loss: {:.4}",
            self.level,
            self.n_nodes,
            self.epochs_completed,
            self.critic_updates,
            self.generator_updates,
            self.total_time.as_secs_f32(),
            self.critic_loss.last().unwrap_or(&0.0),
            self.generator_loss.last().unwrap_or(&0.0)
        )
    }
}

fn recent_mean(values: &[f32], window: usize) -> Option<f32> {
    let window = window.min(values.len());
    if window == 0 {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f32>() / window as f32)
}

/// Outcome of a complete run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Metrics of every trained level, in order
    pub levels: Vec<LevelMetrics>,
    /// Wall time of the run
    pub total_time: Duration,
}

impl RunSummary {
    /// Get summary statistics
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self.levels.iter().map(LevelMetrics::summary).collect();
        lines.push(format!("Total training time: {:.2}s", self.total_time.as_secs_f32()));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_means() {
        let mut metrics = LevelMetrics::new(1, 20);
        assert_eq!(metrics.recent_critic_loss(5), None);

        metrics.record_critic(1.0);
        metrics.record_critic(3.0);
        metrics.record_generator(-2.0);

        assert_eq!(metrics.critic_updates, 2);
        assert_eq!(metrics.generator_updates, 1);
        assert_eq!(metrics.recent_critic_loss(10), Some(2.0));
        assert_eq!(metrics.recent_critic_loss(1), Some(3.0));
        assert!(metrics.summary().contains("20 nodes"));
    }
}
