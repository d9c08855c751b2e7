//! Benchmark suite for danci-adaptive
//!
//! Run with: cargo bench

use std::collections::HashMap;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use danci_adaptive::adaptive::ability::{AbilityEstimator, ScoredResponse};
use danci_adaptive::adaptive::calibration::{CalibrationObservation, ItemCalibrator};
use danci_adaptive::adaptive::config::{CalibrationConfig, SelectorConfig, TracerConfig};
use danci_adaptive::adaptive::irt;
use danci_adaptive::adaptive::knowledge::dkt::{Interaction, KnowledgeTracer};
use danci_adaptive::adaptive::selection::{ItemSelector, SelectionContext};
use danci_adaptive::adaptive::{EstimationMethod, Item, ItemParams};

fn bench_irt(c: &mut Criterion) {
    let params = ItemParams::new(1.3, 0.4, 0.2);
    c.bench_function("irt::probability", |b| {
        b.iter(|| irt::probability(black_box(0.7), black_box(&params)))
    });
    c.bench_function("irt::fisher_information", |b| {
        b.iter(|| irt::fisher_information(black_box(0.7), black_box(&params)))
    });
}

fn bench_eap(c: &mut Criterion) {
    let estimator = AbilityEstimator::default();
    let responses: Vec<ScoredResponse> = (0..30)
        .map(|i| ScoredResponse::new(ItemParams::new(1.0, -1.5 + 0.1 * i as f64, 0.1), i % 3 != 0))
        .collect();
    c.bench_function("AbilityEstimator::estimate EAP (30 responses)", |b| {
        b.iter(|| estimator.estimate(black_box(&responses), EstimationMethod::ExpectedAPosteriori, None))
    });
}

fn bench_selection(c: &mut Criterion) {
    let selector = ItemSelector::new(SelectorConfig::default());
    let items: Vec<Item> = (0..500)
        .map(|i| Item::new(format!("i{i:03}"), ItemParams::new(0.5 + (i % 7) as f64 * 0.2, -3.0 + 0.012 * i as f64, 0.1)))
        .collect();
    let recent: Vec<String> = (0..5).map(|i| format!("i{i:03}")).collect();
    let last_seen = HashMap::new();
    let mut rng = StdRng::seed_from_u64(7);
    c.bench_function("ItemSelector::select (500 items)", |b| {
        b.iter(|| {
            let ctx = SelectionContext {
                theta: 0.3,
                recent: &recent,
                last_seen: &last_seen,
                now: Utc::now(),
            };
            selector.select(black_box(&items), &ctx, &mut rng)
        })
    });
}

fn bench_calibration(c: &mut Criterion) {
    let calibrator = ItemCalibrator::new(CalibrationConfig::default());
    let truth = ItemParams::new(1.2, 0.3, 0.15);
    let item = Item::new("cal", ItemParams::default());
    let mut rng = StdRng::seed_from_u64(11);
    let observations: Vec<CalibrationObservation> = (0..300)
        .map(|_| {
            let theta = rng.random_range(-3.0..3.0);
            CalibrationObservation {
                theta,
                correct: rng.random::<f64>() < irt::probability(theta, &truth),
            }
        })
        .collect();
    let now = Utc::now();
    c.bench_function("ItemCalibrator::calibrate (300 observations)", |b| {
        b.iter(|| calibrator.calibrate(&item, black_box(&observations), now))
    });
}

fn bench_tracer_step(c: &mut Criterion) {
    let concepts: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();
    let tracer = match KnowledgeTracer::new(concepts, TracerConfig::default()) {
        Ok(tracer) => tracer,
        Err(err) => panic!("tracer construction failed: {err}"),
    };
    let start = Utc::now();
    c.bench_function("KnowledgeTracer::step", |b| {
        b.iter_batched(
            || tracer.initial_state(),
            |mut state| {
                for i in 0..10 {
                    let interaction = Interaction {
                        concept_id: format!("c{}", i % 20),
                        correct: i % 2 == 0,
                        timestamp: start + Duration::seconds(i),
                    };
                    let _ = tracer.step(&mut state, &interaction);
                }
                state
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_irt,
    bench_eap,
    bench_selection,
    bench_calibration,
    bench_tracer_step
);
criterion_main!(benches);
