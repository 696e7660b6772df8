use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ds_core::{FittingService, ModelConfig};
use ds_inference::{
    FrequentistCalculator, MaximumLikelihoodEstimator, NormalizerConfig, ProfileLikelihoodTestStat,
    TestStatConfig, ToyConfig, build_null_model, ensure_alt_snapshot, normalize_parameters,
    prepare_poi,
};
use ds_translate::WorkspaceStore;
use std::hint::black_box;
use std::sync::Arc;

fn load_hypotheses() -> (ModelConfig, ModelConfig, ds_core::Dataset) {
    let json = include_str!("../../../tests/fixtures/discovery_store.json");
    let store = WorkspaceStore::from_json_str(json).unwrap();
    let mut alt = store.model_config("combined", "ModelConfig").unwrap();
    let data = store.dataset("combined", "obsData").unwrap();
    normalize_parameters(&mut alt, &NormalizerConfig::default()).unwrap();
    prepare_poi(&mut alt, 40.0).unwrap();
    ensure_alt_snapshot(&mut alt, Some(1.0)).unwrap();
    let null = build_null_model(&alt).unwrap();
    (alt, null, data)
}

fn bench_evaluate_observed(c: &mut Criterion) {
    let (alt, null, data) = load_hypotheses();
    let fitter: Arc<dyn FittingService> = Arc::new(MaximumLikelihoodEstimator::new());
    let stat = ProfileLikelihoodTestStat::new(fitter, TestStatConfig::default());

    c.bench_function("profile_ts_observed", |b| {
        b.iter(|| black_box(stat.evaluate(black_box(&alt), black_box(&null), black_box(&data))).unwrap())
    });
}

fn bench_null_toys(c: &mut Criterion) {
    let (alt, null, data) = load_hypotheses();
    let fitter: Arc<dyn FittingService> = Arc::new(MaximumLikelihoodEstimator::new());

    let mut group = c.benchmark_group("null_toys");
    group.sample_size(10);
    for n in [4usize, 16] {
        let stat = ProfileLikelihoodTestStat::new(Arc::clone(&fitter), TestStatConfig::default());
        let calc = FrequentistCalculator::new(
            data.clone(),
            alt.clone(),
            null.clone(),
            Arc::clone(&fitter),
            stat,
        )
        .with_config(ToyConfig { n_toys_null: n, seed: 10000, ..Default::default() });
        group.bench_with_input(BenchmarkId::new("fixture", n), &n, |b, _| {
            b.iter(|| black_box(calc.run()).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate_observed, bench_null_toys);
criterion_main!(benches);
