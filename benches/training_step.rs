use criterion::{criterion_group, criterion_main, Criterion};
use cascade_gan::core::{BatchChainer, FreezeSet, Role};
use cascade_gan::{LevelScheduler, LossKind, TrainingConfig, TrainingData};
use rand::SeedableRng;

fn bench_generator_step(c: &mut Criterion) {
    let mut config = TrainingConfig::quick(vec![10]);
    config.batch_size = 16;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let samples = config.samples_required();
    let data = TrainingData::synthetic(&config.n_nodes, samples, &mut rng).unwrap();
    let mut scheduler = LevelScheduler::new(config.clone(), data).unwrap();

    let level = scheduler.levels()[0];
    let models = vec![level.stacked];
    let mut chainer = BatchChainer::new(config.n_nodes.clone(), config.noise_dim, Some(0));
    let targets = LossKind::Wasserstein.real_labels(config.batch_size);
    let freeze = FreezeSet::empty().with(Role::Discriminator);

    c.bench_function("generator_step_n10", |b| {
        b.iter(|| {
            let inputs = chainer
                .generator_inputs(scheduler.arena(), &models, 0, config.batch_size)
                .unwrap();
            let arena = scheduler.arena_mut();
            level.stacked.train_on_batch(arena, &inputs, &targets, &freeze).unwrap();
        })
    });
}

fn bench_level(c: &mut Criterion) {
    let config = TrainingConfig::quick(vec![6, 10]);
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let samples = config.samples_required();
    let data = TrainingData::synthetic(&config.n_nodes, samples, &mut rng).unwrap();

    c.bench_function("two_level_run", |b| {
        b.iter(|| {
            let mut scheduler = LevelScheduler::new(config.clone(), data.clone()).unwrap();
            scheduler.run(&mut cascade_gan::core::NullReporter).unwrap();
        })
    });
}

criterion_group!(benches, bench_generator_step, bench_level);
criterion_main!(benches);
