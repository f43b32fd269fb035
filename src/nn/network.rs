//! The network collaborator contract and its dense implementation

use ndarray::{concatenate, s, Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use super::dense::{Activation, Dense};
use super::loss::LossKind;
use super::optimizer::OptimizerSpec;
use crate::{CascadeGanError, Result};

/// Cached forward pass, consumed by [`Network::backward`]
#[derive(Clone, Debug)]
pub struct Trace {
    /// Concatenated input `[batch, sum(input_dims)]`
    pub input: Array2<f32>,
    /// Pre-activations of every layer
    pub(crate) pre_activations: Vec<Array2<f32>>,
    /// Activations of every layer (the last one before the head)
    pub(crate) activations: Vec<Array2<f32>>,
    /// Network output after the head
    pub output: Array2<f32>,
}

/// Parameter gradients, one entry per layer
#[derive(Clone, Debug)]
pub struct Gradients {
    /// Weight gradients
    pub weights: Vec<Array2<f32>>,
    /// Bias gradients
    pub biases: Vec<Array1<f32>>,
}

/// Trainable function approximator
///
/// Inputs are a list of `[batch, width]` matrices that the network
/// concatenates along the feature axis. Gradient flow is controlled by the
/// caller: a network only changes when `apply_gradients` or `train_on_batch`
/// is called on it.
pub trait Network {
    /// Human readable name
    fn name(&self) -> &str;

    /// Widths of the expected inputs
    fn input_dims(&self) -> &[usize];

    /// Width of the output
    fn output_dim(&self) -> usize;

    /// Set the loss and optimizer, resetting optimizer state
    fn compile(&mut self, loss: LossKind, optimizer: OptimizerSpec);

    /// Compiled loss, if any
    fn loss_kind(&self) -> Option<LossKind>;

    /// Forward pass keeping everything needed for backpropagation
    fn forward(&self, inputs: &[Array2<f32>]) -> Result<Trace>;

    /// Backward pass: gradients with respect to each input and to the parameters
    fn backward(
        &self,
        trace: &Trace,
        grad_output: &Array2<f32>,
    ) -> Result<(Vec<Array2<f32>>, Gradients)>;

    /// One optimizer step with the compiled optimizer
    fn apply_gradients(&mut self, gradients: &Gradients) -> Result<()>;

    /// Read-only views of every trainable tensor
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Mutable views of every trainable tensor
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Inference forward pass
    fn predict(&self, inputs: &[Array2<f32>]) -> Result<Array2<f32>> {
        Ok(self.forward(inputs)?.output)
    }

    /// One gradient step on a batch against the compiled loss
    fn train_on_batch(&mut self, inputs: &[Array2<f32>], targets: &Array2<f32>) -> Result<f32> {
        let loss_kind = self.loss_kind().ok_or_else(|| {
            CascadeGanError::Configuration(format!("Network '{}' was not compiled", self.name()))
        })?;
        let trace = self.forward(inputs)?;
        let (loss, grad) = loss_kind.evaluate(&trace.output, targets)?;
        let (_, gradients) = self.backward(&trace, &grad)?;
        self.apply_gradients(&gradients)?;
        Ok(loss)
    }

    /// Total number of trainable scalars
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}

/// Output head applied after the last dense layer
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Head {
    /// Raw linear output
    Linear,
    /// Independent softmax over each of `groups` equal slices of the output
    GroupedSoftmax {
        /// Number of slices
        groups: usize,
    },
}

#[derive(Clone, Debug)]
struct Compiled {
    loss: LossKind,
    optimizer: OptimizerSpec,
    weight_slots: Vec<Array2<f32>>,
    bias_slots: Vec<Array1<f32>>,
}

/// Multi-layer perceptron over concatenated inputs
#[derive(Clone, Debug)]
pub struct Mlp {
    name: String,
    input_dims: Vec<usize>,
    layers: Vec<Dense>,
    head: Head,
    compiled: Option<Compiled>,
}

impl Mlp {
    /// Create a network `inputs -> hidden... -> output_dim` with leaky-ReLU hidden units
    pub fn new<R: Rng>(
        name: &str,
        input_dims: Vec<usize>,
        hidden_dims: &[usize],
        output_dim: usize,
        head: Head,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dims.is_empty() || input_dims.contains(&0) || output_dim == 0 {
            return Err(CascadeGanError::Configuration(format!(
                "Network '{}' needs non-empty inputs and output", name
            )));
        }
        if let Head::GroupedSoftmax { groups } = head {
            if groups == 0 || output_dim % groups != 0 {
                return Err(CascadeGanError::Configuration(format!(
                    "Output width {} of '{}' cannot be split into {} softmax groups",
                    output_dim, name, groups
                )));
            }
        }

        let mut widths = vec![input_dims.iter().sum::<usize>()];
        widths.extend_from_slice(hidden_dims);
        widths.push(output_dim);

        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = if i + 2 == widths.len() {
                    Activation::Linear
                } else {
                    Activation::LeakyRelu(0.2)
                };
                Dense::new(pair[0], pair[1], activation, rng)
            })
            .collect();

        Ok(Mlp {
            name: name.to_string(),
            input_dims,
            layers,
            head,
            compiled: None,
        })
    }

    /// Output head
    pub fn head(&self) -> Head {
        self.head
    }

    fn concat_inputs(&self, inputs: &[Array2<f32>]) -> Result<Array2<f32>> {
        if inputs.len() != self.input_dims.len() {
            return Err(CascadeGanError::Configuration(format!(
                "Network '{}' expects {} inputs, got {}",
                self.name, self.input_dims.len(), inputs.len()
            )));
        }
        for (i, (input, &width)) in inputs.iter().zip(&self.input_dims).enumerate() {
            if input.ncols() != width {
                return Err(CascadeGanError::Configuration(format!(
                    "Input {} of '{}' has width {}, expected {}",
                    i, self.name, input.ncols(), width
                )));
            }
        }

        let views: Vec<_> = inputs.iter().map(|x| x.view()).collect();
        Ok(concatenate(Axis(1), &views)?)
    }
}

impl Network for Mlp {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map(Dense::output_dim).unwrap_or(0)
    }

    fn compile(&mut self, loss: LossKind, optimizer: OptimizerSpec) {
        self.compiled = Some(Compiled {
            loss,
            optimizer,
            weight_slots: self.layers.iter().map(|l| Array2::zeros(l.weights.raw_dim())).collect(),
            bias_slots: self.layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
        });
    }

    fn loss_kind(&self) -> Option<LossKind> {
        self.compiled.as_ref().map(|c| c.loss)
    }

    fn forward(&self, inputs: &[Array2<f32>]) -> Result<Trace> {
        let input = self.concat_inputs(inputs)?;
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut activations = Vec::with_capacity(self.layers.len());

        let mut x = input.clone();
        for layer in &self.layers {
            let (z, a) = layer.forward(&x);
            pre_activations.push(z);
            activations.push(a.clone());
            x = a;
        }

        let output = match self.head {
            Head::Linear => x,
            Head::GroupedSoftmax { groups } => grouped_softmax(&x, groups),
        };

        Ok(Trace { input, pre_activations, activations, output })
    }

    fn backward(
        &self,
        trace: &Trace,
        grad_output: &Array2<f32>,
    ) -> Result<(Vec<Array2<f32>>, Gradients)> {
        if grad_output.dim() != trace.output.dim() {
            return Err(CascadeGanError::Configuration(format!(
                "Gradient {:?} does not match output {:?} of '{}'",
                grad_output.dim(), trace.output.dim(), self.name
            )));
        }

        let mut grad = match self.head {
            Head::Linear => grad_output.clone(),
            Head::GroupedSoftmax { groups } => {
                grouped_softmax_backward(&trace.output, grad_output, groups)
            }
        };

        let n_layers = self.layers.len();
        let mut weights = vec![Array2::zeros((0, 0)); n_layers];
        let mut biases = vec![Array1::zeros(0); n_layers];

        for i in (0..n_layers).rev() {
            let layer_input = if i == 0 { &trace.input } else { &trace.activations[i - 1] };
            let (grad_x, grad_w, grad_b) =
                self.layers[i].backward(layer_input, &trace.pre_activations[i], &grad);
            weights[i] = grad_w;
            biases[i] = grad_b;
            grad = grad_x;
        }

        let mut input_grads = Vec::with_capacity(self.input_dims.len());
        let mut offset = 0;
        for &width in &self.input_dims {
            input_grads.push(grad.slice(s![.., offset..offset + width]).to_owned());
            offset += width;
        }

        Ok((input_grads, Gradients { weights, biases }))
    }

    fn apply_gradients(&mut self, gradients: &Gradients) -> Result<()> {
        let compiled = self.compiled.as_mut().ok_or_else(|| {
            CascadeGanError::Configuration(format!("Network '{}' was not compiled", self.name))
        })?;
        let n_layers = self.layers.len();
        if gradients.weights.len() != n_layers || gradients.biases.len() != n_layers {
            return Err(CascadeGanError::Configuration(format!(
                "Gradients for {} layers applied to '{}' with {} layers",
                gradients.weights.len(), self.name, self.layers.len()
            )));
        }

        let optimizer = compiled.optimizer;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let slot = &mut compiled.weight_slots[i];
            optimizer.update(&mut layer.weights, slot, &gradients.weights[i]);
            optimizer.update(&mut layer.bias, &mut compiled.bias_slots[i], &gradients.biases[i]);
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers
            .iter()
            .flat_map(|l| [l.weights.view().into_dyn(), l.bias.view().into_dyn()])
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.layers
            .iter_mut()
            .flat_map(|l| [l.weights.view_mut().into_dyn(), l.bias.view_mut().into_dyn()])
            .collect()
    }
}

/// Softmax over each of `groups` equal column slices
fn grouped_softmax(x: &Array2<f32>, groups: usize) -> Array2<f32> {
    let width = x.ncols() / groups;
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        for g in 0..groups {
            let mut slice = row.slice_mut(s![g * width..(g + 1) * width]);
            let max = slice.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            slice.mapv_inplace(|v| (v - max).exp());
            let total = slice.sum();
            slice /= total;
        }
    }
    out
}

/// Backpropagate through [`grouped_softmax`] given its output `y`
fn grouped_softmax_backward(y: &Array2<f32>, grad_y: &Array2<f32>, groups: usize) -> Array2<f32> {
    let width = y.ncols() / groups;
    let mut grad_z = Array2::zeros(y.raw_dim());
    for r in 0..y.nrows() {
        for g in 0..groups {
            let cols = g * width..(g + 1) * width;
            let y_slice = y.slice(s![r, cols.clone()]);
            let gy_slice = grad_y.slice(s![r, cols.clone()]);
            let dot = (&y_slice * &gy_slice).sum();
            let dz = &y_slice * &(gy_slice.mapv(|v| v - dot));
            grad_z.slice_mut(s![r, cols]).assign(&dz);
        }
    }
    grad_z
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_forward_concatenates_inputs() {
        let mlp = Mlp::new("critic", vec![2, 3], &[4], 1, Head::Linear, &mut rng()).unwrap();
        let out = mlp.predict(&[Array2::ones((5, 2)), Array2::ones((5, 3))]).unwrap();
        assert_eq!(out.dim(), (5, 1));

        assert!(mlp.predict(&[Array2::ones((5, 2))]).is_err());
        assert!(mlp.predict(&[Array2::ones((5, 2)), Array2::ones((5, 4))]).is_err());
    }

    #[test]
    fn test_grouped_softmax_rows_sum_to_one() {
        let head = Head::GroupedSoftmax { groups: 3 };
        let mlp = Mlp::new("topology", vec![3], &[8], 12, head, &mut rng()).unwrap();
        let out = mlp.predict(&[Array2::from_elem((2, 3), 0.5)]).unwrap();

        for row in out.rows() {
            for g in 0..3 {
                let total: f32 = row.slice(s![g * 4..(g + 1) * 4]).sum();
                assert!((total - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_input_gradients_match_finite_difference() {
        let head = Head::GroupedSoftmax { groups: 2 };
        let mlp = Mlp::new("softmax", vec![2, 2], &[5], 6, head, &mut rng()).unwrap();
        let a = ndarray::array![[0.1f32, -0.4]];
        let b = ndarray::array![[0.7f32, 0.2]];
        // Weighted sum of outputs as a scalar objective
        let weights = Array2::from_shape_fn((1, 6), |(_, j)| j as f32 - 2.5);

        let trace = mlp.forward(&[a.clone(), b.clone()]).unwrap();
        let (input_grads, _) = mlp.backward(&trace, &weights).unwrap();
        assert_eq!(input_grads.len(), 2);
        assert_eq!(input_grads[1].dim(), (1, 2));

        let objective =
            |x: &Array2<f32>| (mlp.predict(&[a.clone(), x.clone()]).unwrap() * &weights).sum();
        let eps = 1e-2;
        let mut bumped = b.clone();
        bumped[(0, 0)] += eps;
        let numeric = (objective(&bumped) - objective(&b)) / eps;

        assert!((numeric - input_grads[1][(0, 0)]).abs() < 5e-2);
    }

    #[test]
    fn test_train_on_batch_requires_compile() {
        let mut mlp = Mlp::new("critic", vec![3], &[4], 1, Head::Linear, &mut rng()).unwrap();
        let x = Array2::ones((2, 3));
        let y = Array2::from_elem((2, 1), -1.0);
        assert!(mlp.train_on_batch(&[x.clone()], &y).is_err());

        mlp.compile(LossKind::Wasserstein, OptimizerSpec::Sgd { learning_rate: 0.1 });
        let before = mlp.predict(&[x.clone()]).unwrap()[(0, 0)];
        mlp.train_on_batch(&[x.clone()], &y).unwrap();
        let after = mlp.predict(&[x]).unwrap()[(0, 0)];

        // Real label -1: the critic pushes its score on this input up
        assert!(after > before);
    }

    #[test]
    fn test_parameter_views() {
        let mut mlp = Mlp::new("tiny", vec![2], &[3], 1, Head::Linear, &mut rng()).unwrap();
        assert_eq!(mlp.num_parameters(), 2 * 3 + 3 + 3 + 1);
        for mut p in mlp.parameters_mut() {
            p.fill(0.5);
        }
        assert!(mlp.parameters().iter().all(|p| p.iter().all(|&v| v == 0.5)));
    }
}
