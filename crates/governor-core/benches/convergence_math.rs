//! Benchmarks the pure math in [`governor_core::convergence`] and
//! [`governor_core::hatchery`] sizing, which run on every governance tick
//! and hatchery tick respectively and must stay cheap.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use governor_core::convergence::{compute_signals, ConvergenceConfig, ConvergencePoint, DimensionScores};
use governor_core::hatchery::{desired_instances, RoleConfig};

fn make_points(n: usize) -> Vec<ConvergencePoint> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n.max(1) as f64;
            let dims = DimensionScores {
                claim_confidence: 0.4 + 0.5 * t,
                contradiction_resolution: 0.3 + 0.6 * t,
                goal_completion: 0.2 + 0.7 * t,
                risk_score_inverse: 0.5 + 0.4 * t,
            };
            ConvergencePoint::new(i as i64, dims, Utc::now())
        })
        .collect()
}

fn bench_compute_signals(c: &mut Criterion) {
    let points = make_points(200);
    let config = ConvergenceConfig::default();
    c.bench_function("compute_signals_200_points", |b| {
        b.iter(|| compute_signals(black_box(&points), black_box(&config), black_box(0.92)))
    });
}

fn bench_desired_instances(c: &mut Criterion) {
    let config = RoleConfig::new("extractor");
    c.bench_function("desired_instances", |b| {
        b.iter(|| desired_instances(black_box(4.2), black_box(1.3), black_box(&config)))
    });
}

criterion_group!(benches, bench_compute_signals, bench_desired_instances);
criterion_main!(benches);
