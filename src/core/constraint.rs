//! Weight clipping for the Wasserstein critic

use crate::nn::Network;

/// Clamp every trainable scalar of `model` into `[bounds[0], bounds[1]]`
///
/// Bounds are validated with the configuration, so `low <= high` holds here.
pub fn clip(model: &mut dyn Network, bounds: [f32; 2]) -> &mut dyn Network {
    let [low, high] = bounds;
    for mut tensor in model.parameters_mut() {
        tensor.mapv_inplace(|w| w.max(low).min(high));
    }
    model
}

/// Whether every trainable scalar of `model` lies inside `bounds`
pub fn within_bounds(model: &dyn Network, bounds: [f32; 2]) -> bool {
    model
        .parameters()
        .iter()
        .all(|tensor| tensor.iter().all(|&w| w >= bounds[0] && w <= bounds[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Head, Mlp};
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn network(seed: u64) -> Mlp {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        Mlp::new("critic", vec![3, 2], &[6], 1, Head::Linear, &mut rng).unwrap()
    }

    fn snapshot(model: &dyn Network) -> Vec<f32> {
        model.parameters().iter().flat_map(|t| t.iter().copied().collect::<Vec<_>>()).collect()
    }

    #[test]
    fn test_clip_values() {
        let mut model = network(1);
        for mut tensor in model.parameters_mut() {
            tensor.fill(3.0);
        }
        clip(&mut model, [-0.5, 0.25]);
        assert!(snapshot(&model).iter().all(|&w| w == 0.25));
    }

    proptest! {
        #[test]
        fn prop_clip_is_bounded_and_idempotent(
            seed in 0u64..1000,
            low in -1.0f32..0.0,
            width in 0.0f32..1.0,
        ) {
            let bounds = [low, low + width];
            let mut model = network(seed);

            clip(&mut model, bounds);
            prop_assert!(within_bounds(&model, bounds));

            let once = snapshot(&model);
            clip(&mut model, bounds);
            prop_assert_eq!(once, snapshot(&model));
        }
    }
}
