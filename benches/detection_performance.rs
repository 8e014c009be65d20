//! Detection latency over realistic history sizes
//!
//! Scoring runs inline on expense submission, so a full evaluation against a
//! year of history should stay well under a millisecond.

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use expense_anomaly::anomaly_detection::AnomalyDetector;
use expense_anomaly::Expense;
use rust_decimal::Decimal;

const MERCHANTS: [&str; 6] = [
    "Corner Deli",
    "City Cab",
    "Paper & Co",
    "Metro Rail",
    "Blue Bottle Coffee",
    "Office Depot",
];
const CATEGORIES: [&str; 4] = ["Meals", "Travel", "Office", "Coffee"];

fn history(size: usize) -> Vec<Expense> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    (0..size)
        .map(|i| {
            let date = start + Duration::days((i / 3) as i64);
            Expense::new(
                "bench-user",
                Decimal::new(1000 + (i as i64 * 7919) % 9000, 2),
                date,
                date.and_hms_opt(8 + (i % 11) as u32, 0, 0).unwrap(),
            )
            .with_category(CATEGORIES[i % CATEGORIES.len()])
            .with_merchant(MERCHANTS[i % MERCHANTS.len()])
            .with_description(format!("receipt {}", i % 40))
        })
        .collect()
}

fn candidate() -> Expense {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    Expense::new(
        "bench-user",
        Decimal::new(48_000, 2),
        date,
        date.and_hms_opt(2, 30, 0).unwrap(),
    )
    .with_category("Meals")
    .with_merchant("Brand New Place")
    .with_description("receipt 7")
}

fn bench_evaluate(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let expense = candidate();

    let mut group = c.benchmark_group("evaluate");
    for size in [50usize, 250, 1000] {
        let past = history(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &past, |b, past| {
            b.iter(|| detector.evaluate(black_box(&expense), black_box(past)));
        });
    }
    group.finish();
}

fn bench_statistics_replay(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let past = history(250);

    c.bench_function("user_statistics_250", |b| {
        b.iter(|| detector.get_user_anomaly_statistics(black_box("bench-user"), black_box(&past)));
    });
}

fn bench_training(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let past = history(1000);

    c.bench_function("train_model_1000", |b| {
        b.iter(|| detector.train_model(black_box(&past)));
    });
}

criterion_group!(benches, bench_evaluate, bench_statistics_replay, bench_training);
criterion_main!(benches);
