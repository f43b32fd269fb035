//! Real and generated batches, and the chaining of generated samples across levels

use ndarray::{concatenate, s, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::composer::StackedModel;
use crate::data::TrainingData;
use crate::nn::{ModelArena, LossKind};
use crate::tree::{PruferCodec, TopologyCodec};
use crate::{CascadeGanError, Result};

/// A batch of `(geometry, topology)` pairs
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBatch {
    /// Coordinates `(batch, n - 1, 3)`
    pub geometry: Array3<f32>,
    /// Categorical rows `(batch, n - 2, n)`
    pub topology: Array3<f32>,
}

impl SampleBatch {
    /// Rebuild a batch from flattened network outputs
    pub fn from_flat(
        geometry: &Array2<f32>,
        topology: &Array2<f32>,
        n_nodes: usize,
    ) -> Result<Self> {
        let batch = geometry.nrows();
        let geometry =
            Array3::from_shape_vec((batch, n_nodes - 1, 3), geometry.iter().copied().collect())?;
        let topology = Array3::from_shape_vec(
            (topology.nrows(), n_nodes - 2, n_nodes),
            topology.iter().copied().collect(),
        )?;
        if topology.dim().0 != batch {
            return Err(CascadeGanError::Configuration(format!(
                "Geometry batch {} and topology batch {} differ", batch, topology.dim().0
            )));
        }
        Ok(SampleBatch { geometry, topology })
    }

    /// Flattened `[geometry, topology]` matrices, one row per sample
    pub fn flat(&self) -> Result<Vec<Array2<f32>>> {
        let batch = self.len();
        let rows = batch.max(1);
        let geometry = Array2::from_shape_vec(
            (batch, self.geometry.len() / rows),
            self.geometry.iter().copied().collect(),
        )?;
        let topology = Array2::from_shape_vec(
            (batch, self.topology.len() / rows),
            self.topology.iter().copied().collect(),
        )?;
        Ok(vec![geometry, topology])
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.geometry.dim().0
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes per tree
    pub fn n_nodes(&self) -> usize {
        self.geometry.dim().1 + 1
    }

    /// Stack two batches of the same tree size, `self` first
    pub fn concat(&self, other: &SampleBatch) -> Result<SampleBatch> {
        Ok(SampleBatch {
            geometry: concatenate(Axis(0), &[self.geometry.view(), other.geometry.view()])?,
            topology: concatenate(Axis(0), &[self.topology.view(), other.topology.view()])?,
        })
    }

    /// Geometry `(n - 1, 3)` and topology `(n - 2, n)` of one sample
    pub fn item(&self, index: usize) -> Option<(Array2<f32>, Array2<f32>)> {
        if index >= self.len() {
            return None;
        }
        Some((
            self.geometry.slice(s![index, .., ..]).to_owned(),
            self.topology.slice(s![index, .., ..]).to_owned(),
        ))
    }
}

/// Critic training batch: real samples first, then generated ones
#[derive(Clone, Debug, PartialEq)]
pub struct CriticBatch {
    /// Concatenated samples
    pub samples: SampleBatch,
    /// Label column `(2 * batch, 1)`
    pub labels: Array2<f32>,
}

impl CriticBatch {
    /// Concatenate `real` then `generated` and attach the labels of `loss`
    pub fn assemble(real: &SampleBatch, generated: &SampleBatch, loss: LossKind) -> Result<Self> {
        if real.len() != generated.len() || real.n_nodes() != generated.n_nodes() {
            return Err(CascadeGanError::Configuration(format!(
                "Real batch of {} trees with {} nodes cannot pair with {} generated trees with {} nodes",
                real.len(), real.n_nodes(), generated.len(), generated.n_nodes()
            )));
        }
        let labels = concatenate(
            Axis(0),
            &[loss.real_labels(real.len()).view(), loss.generated_labels(generated.len()).view()],
        )?;
        Ok(CriticBatch { samples: real.concat(generated)?, labels })
    }
}

/// Source of real slices and of bottom-up generated chains
///
/// A generated sample of level `l` needs a generated sample of every level
/// below it. Each request walks the chain once from level 0, so every lower
/// level is sampled exactly once per request.
#[derive(Debug)]
pub struct BatchChainer {
    n_nodes: Vec<usize>,
    noise_dim: usize,
    rng: StdRng,
    samples_drawn: Vec<usize>,
}

impl BatchChainer {
    /// Chainer for the given tree sizes
    pub fn new(n_nodes: Vec<usize>, noise_dim: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let levels = n_nodes.len();
        BatchChainer { n_nodes, noise_dim, rng, samples_drawn: vec![0; levels] }
    }

    fn n_nodes(&self, level: usize) -> Result<usize> {
        self.n_nodes.get(level).copied().ok_or_else(|| {
            CascadeGanError::Configuration(format!("Level {} does not exist", level))
        })
    }

    /// Standard normal noise `(batch_size, noise_dim)`
    pub fn noise(&mut self, batch_size: usize) -> Array2<f32> {
        let rng = &mut self.rng;
        Array2::from_shape_fn((batch_size, self.noise_dim), |_| rng.sample(StandardNormal))
    }

    /// Rows `[batch * batch_size, (batch + 1) * batch_size)` of a level's real data
    pub fn real_batch(
        &self,
        data: &TrainingData,
        level: usize,
        batch: usize,
        batch_size: usize,
    ) -> Result<SampleBatch> {
        let n = self.n_nodes(level)?;
        let stored = data.level(n)?;
        let (start, end) = (batch * batch_size, (batch + 1) * batch_size);
        if end > stored.samples() {
            return Err(CascadeGanError::DataBounds {
                key: TrainingData::key(n),
                batch,
                batch_size,
                available: stored.samples(),
            });
        }

        let geometry = stored.geometry.slice(s![start..end, .., ..]).to_owned();
        let mut topology = Array3::zeros((batch_size, n - 2, n));
        let codes = stored.morphology.slice(s![start..end, ..]);
        for (row, code) in codes.rows().into_iter().enumerate() {
            let code: Vec<usize> = code.to_vec();
            topology.slice_mut(s![row, .., ..]).assign(&PruferCodec.one_hot(&code, n)?);
        }

        Ok(SampleBatch { geometry, topology })
    }

    /// Generated samples of levels `0..=level`, each level conditioned on the one below
    pub fn generated_chain(
        &mut self,
        arena: &ModelArena,
        models: &[StackedModel],
        level: usize,
        batch_size: usize,
    ) -> Result<Vec<SampleBatch>> {
        self.n_nodes(level)?;
        if models.len() <= level {
            return Err(CascadeGanError::Configuration(format!(
                "No stacked model for level {}", level
            )));
        }

        let mut chain: Vec<SampleBatch> = Vec::with_capacity(level + 1);
        for (k, model) in models.iter().enumerate().take(level + 1) {
            let noise = self.noise(batch_size);
            let inputs = model.inputs(chain.last(), noise)?;
            chain.push(model.sample(arena, &inputs)?);
            self.samples_drawn[k] += 1;
        }
        Ok(chain)
    }

    /// Generated sample of one level
    pub fn generated_batch(
        &mut self,
        arena: &ModelArena,
        models: &[StackedModel],
        level: usize,
        batch_size: usize,
    ) -> Result<SampleBatch> {
        self.generated_chain(arena, models, level, batch_size)?
            .pop()
            .ok_or_else(|| {
                CascadeGanError::Configuration(format!("Empty chain for level {}", level))
            })
    }

    /// Generator inputs for a level: fresh noise plus, above level 0, a generated
    /// lower-level sample
    pub fn generator_inputs(
        &mut self,
        arena: &ModelArena,
        models: &[StackedModel],
        level: usize,
        batch_size: usize,
    ) -> Result<Vec<Array2<f32>>> {
        let model = models.get(level).ok_or_else(|| {
            CascadeGanError::Configuration(format!("No stacked model for level {}", level))
        })?;
        let context = match level {
            0 => None,
            _ => Some(self.generated_batch(arena, models, level - 1, batch_size)?),
        };
        let noise = self.noise(batch_size);
        model.inputs(context.as_ref(), noise)
    }

    /// Number of generated batches drawn per level so far
    pub fn samples_drawn(&self) -> &[usize] {
        &self.samples_drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LevelData;

    fn data() -> TrainingData {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        TrainingData::synthetic(&[5], 8, &mut rng).unwrap()
    }

    #[test]
    fn test_real_batch_slices_rows() {
        let data = data();
        let chainer = BatchChainer::new(vec![5], 3, Some(0));
        let batch = chainer.real_batch(&data, 0, 1, 4).unwrap();

        let stored = data.level(5).unwrap();
        assert_eq!(batch.geometry, stored.geometry.slice(s![4..8, .., ..]));
        assert_eq!(batch.topology.dim(), (4, 3, 5));
        let code = PruferCodec.harden(batch.topology.slice(s![0, .., ..]));
        assert_eq!(code, stored.morphology.row(4).to_vec());
    }

    #[test]
    fn test_real_batch_out_of_range() {
        let data = data();
        let chainer = BatchChainer::new(vec![5], 3, Some(0));
        assert!(matches!(
            chainer.real_batch(&data, 0, 2, 4),
            Err(CascadeGanError::DataBounds { available: 8, .. })
        ));
        assert!(chainer.real_batch(&data, 1, 0, 4).is_err());
    }

    #[test]
    fn test_critic_batch_order_and_labels() {
        let real = SampleBatch {
            geometry: Array3::ones((2, 4, 3)),
            topology: Array3::ones((2, 3, 5)),
        };
        let generated = SampleBatch {
            geometry: Array3::zeros((2, 4, 3)),
            topology: Array3::zeros((2, 3, 5)),
        };

        let batch = CriticBatch::assemble(&real, &generated, LossKind::Wasserstein).unwrap();
        assert_eq!(batch.samples.len(), 4);
        assert_eq!(batch.labels.column(0).to_vec(), vec![-1.0, -1.0, 1.0, 1.0]);
        assert_eq!(batch.samples.geometry[(1, 0, 0)], 1.0);
        assert_eq!(batch.samples.geometry[(2, 0, 0)], 0.0);

        let batch = CriticBatch::assemble(&real, &generated, LossKind::CrossEntropy).unwrap();
        assert_eq!(batch.labels.column(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_flat_round_trip() {
        let stored = LevelData {
            geometry: Array3::from_shape_fn((2, 4, 3), |(b, i, d)| (b * 100 + i * 10 + d) as f32),
            morphology: Array2::zeros((2, 3)),
        };
        let batch = SampleBatch {
            geometry: stored.geometry.clone(),
            topology: Array3::zeros((2, 3, 5)),
        };
        let flat = batch.flat().unwrap();

        assert_eq!(flat[0].dim(), (2, 12));
        assert_eq!(flat[0][(1, 4)], 111.0);
        assert_eq!(SampleBatch::from_flat(&flat[0], &flat[1], 5).unwrap(), batch);
    }

    #[test]
    fn test_noise_is_seeded() {
        let mut a = BatchChainer::new(vec![5], 6, Some(3));
        let mut b = BatchChainer::new(vec![5], 6, Some(3));
        assert_eq!(a.noise(2), b.noise(2));
        assert_eq!(a.noise(2).dim(), (2, 6));
    }
}
