//! Fully connected layer with cached forward and explicit backward passes

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

/// Element-wise activation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    /// Identity
    Linear,
    /// Leaky rectifier with the given negative slope
    LeakyRelu(f32),
}

impl Activation {
    /// Apply to a pre-activation
    pub fn apply(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => z.clone(),
            Activation::LeakyRelu(slope) => z.mapv(|x| if x > 0.0 { x } else { slope * x }),
        }
    }

    /// Derivative at the pre-activation `z`
    pub fn derivative(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => Array2::ones(z.raw_dim()),
            Activation::LeakyRelu(slope) => z.mapv(|x| if x > 0.0 { 1.0 } else { slope }),
        }
    }
}

/// Dense layer computing `activation(x · W + b)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dense {
    /// Weight matrix `[in, out]`
    pub(crate) weights: Array2<f32>,
    /// Bias vector `[out]`
    pub(crate) bias: Array1<f32>,
    /// Activation
    pub(crate) activation: Activation,
}

impl Dense {
    /// Create a layer with Glorot-uniform weights and zero bias
    pub fn new<R: Rng>(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let weights = Array2::from_shape_fn((input_dim, output_dim), |_| {
            rng.gen_range(-limit..limit)
        });

        Dense {
            weights,
            bias: Array1::zeros(output_dim),
            activation,
        }
    }

    /// Input width
    pub fn input_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Output width
    pub fn output_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Forward pass returning `(pre_activation, activation)`
    pub fn forward(&self, x: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let z = x.dot(&self.weights) + &self.bias;
        let a = self.activation.apply(&z);
        (z, a)
    }

    /// Backward pass given the layer input, its pre-activation and `dL/da`
    ///
    /// Returns `(dL/dx, dL/dW, dL/db)`.
    pub fn backward(
        &self,
        x: &Array2<f32>,
        z: &Array2<f32>,
        grad_a: &Array2<f32>,
    ) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
        let grad_z = grad_a * &self.activation.derivative(z);
        let grad_w = x.t().dot(&grad_z);
        let grad_b = grad_z.sum_axis(Axis(0));
        let grad_x = grad_z.dot(&self.weights.t());
        (grad_x, grad_w, grad_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_forward_shapes() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let layer = Dense::new(4, 3, Activation::LeakyRelu(0.2), &mut rng);
        let (z, a) = layer.forward(&Array2::ones((5, 4)));

        assert_eq!(z.dim(), (5, 3));
        assert_eq!(a.dim(), (5, 3));
        for (&z, &a) in z.iter().zip(a.iter()) {
            assert_eq!(a, if z > 0.0 { z } else { 0.2 * z });
        }
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut layer = Dense::new(2, 1, Activation::LeakyRelu(0.2), &mut rng);
        let x = array![[0.3f32, -0.7]];

        let (z, a) = layer.forward(&x);
        let (_, grad_w, _) = layer.backward(&x, &z, &Array2::ones((1, 1)));

        let eps = 1e-3;
        let base = a[(0, 0)];
        layer.weights[(0, 0)] += eps;
        let (_, bumped) = layer.forward(&x);
        let numeric = (bumped[(0, 0)] - base) / eps;

        assert!((numeric - grad_w[(0, 0)]).abs() < 1e-2);
    }
}
