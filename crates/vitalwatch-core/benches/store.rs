//! Benchmark for store and record operations
//! Run: cargo bench -p vitalwatch-core --bench store

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use vitalwatch_core::source::CsvSource;
use vitalwatch_core::{Metric, MetricValues, PatientId, RawVitalRecord, VitalRecord, VitalStore};

fn reading(patient: usize, step: i64) -> VitalRecord {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(step * 5);
    VitalRecord::new(
        format!("PATIENT_{}", patient),
        ts,
        MetricValues::new()
            .with(Metric::HeartRate, 72.0)
            .with(Metric::Spo2, 97.5)
            .with(Metric::Temperature, 36.9),
    )
    .unwrap()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let store = VitalStore::new();
                for i in 0..size {
                    store.append(reading(i % 10, i as i64));
                }
                black_box(store.len())
            })
        });
    }
    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let store = VitalStore::new();
    for i in 0..10_000 {
        store.append(reading(0, i));
    }
    let patient = PatientId::from("PATIENT_0");
    let since = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();

    c.bench_function("store_history_range", |b| {
        b.iter(|| store.history(black_box(&patient), Some(since), None))
    });
    c.bench_function("store_latest", |b| b.iter(|| store.latest(black_box(&patient))));
}

fn bench_from_raw(c: &mut Criterion) {
    let raw = RawVitalRecord::new("PATIENT_1", "2024-01-01T00:00:00Z")
        .with_metric(Metric::HeartRate, 72.0)
        .with_metric(Metric::SystolicBp, 120.0)
        .with_metric(Metric::DiastolicBp, 80.0);

    c.bench_function("record_from_raw", |b| {
        b.iter(|| VitalRecord::from_raw(black_box(raw.clone())))
    });
}

fn bench_csv_parse(c: &mut Criterion) {
    let mut csv = String::from("timestamp,patient_id,heart_rate,spo2,temperature\n");
    for i in 0..1_000 {
        csv.push_str(&format!("2024-01-01T00:{:02}:00Z,PATIENT_{},72.0,97.0,36.9\n", i % 60, i % 5));
    }

    let mut group = c.benchmark_group("csv");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("parse_1000_rows", |b| b.iter(|| CsvSource::parse(black_box(&csv))));
    group.finish();
}

criterion_group!(benches, bench_append, bench_history, bench_from_raw, bench_csv_parse);
criterion_main!(benches);
