//! Critic objectives and their label encodings

use ndarray::Array2;
use serde::{Serialize, Deserialize};

use crate::{CascadeGanError, Result};

/// Run-wide adversarial objective
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Wasserstein critic score: mean of `label * prediction`
    #[default]
    #[serde(alias = "wasserstein_loss")]
    Wasserstein,
    /// Binary cross-entropy on the critic's logit
    #[serde(alias = "binary_crossentropy")]
    CrossEntropy,
}

impl LossKind {
    /// Label attached to real samples
    pub fn real_label(self) -> f32 {
        match self {
            LossKind::Wasserstein => -1.0,
            LossKind::CrossEntropy => 0.0,
        }
    }

    /// Label attached to generated samples
    pub fn generated_label(self) -> f32 {
        1.0
    }

    /// Column of `n` real labels
    pub fn real_labels(self, n: usize) -> Array2<f32> {
        Array2::from_elem((n, 1), self.real_label())
    }

    /// Column of `n` generated labels
    pub fn generated_labels(self, n: usize) -> Array2<f32> {
        Array2::from_elem((n, 1), self.generated_label())
    }

    /// Mean loss over the batch and its gradient with respect to the predictions
    pub fn evaluate(
        self,
        predictions: &Array2<f32>,
        targets: &Array2<f32>,
    ) -> Result<(f32, Array2<f32>)> {
        if predictions.dim() != targets.dim() {
            return Err(CascadeGanError::Configuration(format!(
                "Predictions {:?} and targets {:?} differ in shape",
                predictions.dim(), targets.dim()
            )));
        }
        let n = predictions.len().max(1) as f32;

        match self {
            LossKind::Wasserstein => {
                let loss = (predictions * targets).sum() / n;
                Ok((loss, targets / n))
            }
            LossKind::CrossEntropy => {
                let loss = predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(&p, &y)| softplus(p) - y * p)
                    .sum::<f32>() / n;
                let mut grad = predictions.mapv(sigmoid);
                grad -= targets;
                grad /= n;
                Ok((loss, grad))
            }
        }
    }
}

/// Logistic function
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable `ln(1 + e^x)`
fn softplus(x: f32) -> f32 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}
