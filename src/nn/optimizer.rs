//! First-order optimizers with per-parameter state

use ndarray::{Array, Dimension, Zip};
use serde::{Serialize, Deserialize};

/// Optimizer choice and hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerSpec {
    /// Plain stochastic gradient descent
    Sgd {
        /// Step size
        learning_rate: f32,
    },
    /// RMSprop with a running average of squared gradients
    RmsProp {
        /// Step size
        learning_rate: f32,
        /// Decay of the squared-gradient average
        rho: f32,
        /// Denominator fuzz
        epsilon: f32,
    },
    /// Adagrad with accumulated squared gradients
    Adagrad {
        /// Step size
        learning_rate: f32,
        /// Denominator fuzz
        epsilon: f32,
    },
}

impl OptimizerSpec {
    /// RMSprop with the usual decay and fuzz
    pub fn rms_prop(learning_rate: f32) -> Self {
        OptimizerSpec::RmsProp { learning_rate, rho: 0.9, epsilon: 1e-7 }
    }

    /// Adagrad with the usual fuzz
    pub fn adagrad(learning_rate: f32) -> Self {
        OptimizerSpec::Adagrad { learning_rate, epsilon: 1e-7 }
    }

    /// Same optimizer family with a different step size
    pub fn with_learning_rate(self, learning_rate: f32) -> Self {
        match self {
            OptimizerSpec::Sgd { .. } => OptimizerSpec::Sgd { learning_rate },
            OptimizerSpec::RmsProp { rho, epsilon, .. } => {
                OptimizerSpec::RmsProp { learning_rate, rho, epsilon }
            }
            OptimizerSpec::Adagrad { epsilon, .. } => {
                OptimizerSpec::Adagrad { learning_rate, epsilon }
            }
        }
    }

    /// Step size
    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerSpec::Sgd { learning_rate }
            | OptimizerSpec::RmsProp { learning_rate, .. }
            | OptimizerSpec::Adagrad { learning_rate, .. } => learning_rate,
        }
    }

    /// Check hyperparameters
    pub fn validate(&self) -> Result<(), String> {
        if !(self.learning_rate() > 0.0 && self.learning_rate().is_finite()) {
            return Err("Learning rate must be positive".to_string());
        }
        if let OptimizerSpec::RmsProp { rho, .. } = self {
            if !(0.0..1.0).contains(rho) {
                return Err("RMSprop rho must lie in [0, 1)".to_string());
            }
        }
        Ok(())
    }

    /// Update one parameter tensor in place, using `slot` as its running state
    pub fn update<D: Dimension>(
        &self,
        param: &mut Array<f32, D>,
        slot: &mut Array<f32, D>,
        grad: &Array<f32, D>,
    ) {
        match *self {
            OptimizerSpec::Sgd { learning_rate } => {
                Zip::from(param).and(grad).for_each(|w, &g| *w -= learning_rate * g);
            }
            OptimizerSpec::RmsProp { learning_rate, rho, epsilon } => {
                Zip::from(param).and(slot).and(grad).for_each(|w, s, &g| {
                    *s = rho * *s + (1.0 - rho) * g * g;
                    *w -= learning_rate * g / (s.sqrt() + epsilon);
                });
            }
            OptimizerSpec::Adagrad { learning_rate, epsilon } => {
                Zip::from(param).and(slot).and(grad).for_each(|w, s, &g| {
                    *s += g * g;
                    *w -= learning_rate * g / (s.sqrt() + epsilon);
                });
            }
        }
    }
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::rms_prop(0.001)
    }
}
