//! Alarm evaluation benchmarks

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use stratus::{AlarmConfig, AlarmEngine, AlarmKind, DispatchHandle};

fn create_engine(alarms_per_metric: usize, metrics: usize) -> AlarmEngine {
    let engine = AlarmEngine::new(DispatchHandle::new(1024));
    for m in 0..metrics {
        for a in 0..alarms_per_metric {
            let config = AlarmConfig::new(
                format!("alarm_{}_{}", m, a),
                format!("metric_{}", m),
                AlarmKind::AboveThreshold,
                a as f64,
            )
            .with_persistence(3)
            .with_latch_hours(1.0);
            engine.register_or_replace(config).expect("valid alarm");
        }
    }
    engine
}

fn benchmark_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    for alarm_count in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(alarm_count), &alarm_count, |b, &count| {
            let engine = create_engine(count, 20);
            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                let value = (tick % 200) as f64;
                black_box(engine.evaluate("metric_7", value, start + Duration::seconds(tick)));
            });
            engine.dispatch().drain();
        });
    }

    group.finish();
}

fn benchmark_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    group.bench_function("2000_alarms", |b| {
        let engine = create_engine(100, 20);
        b.iter(|| black_box(engine.periodic_sweep(start)));
    });

    group.finish();
}

fn benchmark_concurrent_metrics(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    c.bench_function("concurrent_4_metrics", |b| {
        let engine = Arc::new(create_engine(5, 4));
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|m| {
                    let engine = Arc::clone(&engine);
                    std::thread::spawn(move || {
                        for i in 0..250 {
                            engine.evaluate(&format!("metric_{}", m), (i % 10) as f64, start + Duration::seconds(i));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(benches, benchmark_evaluate, benchmark_sweep, benchmark_concurrent_metrics);
criterion_main!(benches);
