use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::f64::consts::PI;

use sleeprs::circadian::{fit_circadian_rhythm, CircadianConfig};
use sleeprs::{HrvRecord, SleepDebtCalculator, SleepNeedEstimator, SleepRecord, WeightMethod};

/// Benchmarks for the sleep analysis core
///
/// Dataset sizes follow realistic export lengths: a few months up to
/// several years of nightly records.

fn create_sleep_series(nights: usize) -> Vec<SleepRecord> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..nights)
        .map(|i| {
            let minutes = 360.0 + ((i * 37) % 150) as f64;
            SleepRecord::new(start + Duration::days(i as i64), minutes)
                .with_efficiency(80.0 + (i % 15) as f64)
                .with_deep_minutes(50.0 + (i % 30) as f64)
        })
        .collect()
}

fn create_hrv_series(records: &[SleepRecord]) -> Vec<HrvRecord> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| HrvRecord {
            date: r.date_of_sleep,
            daily_rmssd: Some(35.0 + (i % 20) as f64),
            deep_rmssd: None,
        })
        .collect()
}

fn bench_sleep_need(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sleep Need Estimation");

    for &nights in &[90, 365, 1095] {
        let records = create_sleep_series(nights);
        let hrv = create_hrv_series(&records);

        group.throughput(Throughput::Elements(nights as u64));
        group.bench_with_input(BenchmarkId::new("estimate", nights), &records, |b, records| {
            let estimator = SleepNeedEstimator::new(records, Some(hrv.as_slice()));
            b.iter(|| black_box(estimator.estimate(None)));
        });
    }

    group.finish();
}

fn bench_debt_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sleep Debt History");

    for &nights in &[90, 365, 1095] {
        let records = create_sleep_series(nights);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let start = records[0].date_of_sleep;
        let end = records[nights - 1].date_of_sleep;

        group.throughput(Throughput::Elements(nights as u64));
        group.bench_with_input(BenchmarkId::new("get_history", nights), &nights, |b, _| {
            b.iter(|| black_box(calculator.get_history(start, end, WeightMethod::Linear)));
        });
    }

    group.finish();
}

fn bench_circadian_fit(c: &mut Criterion) {
    let hourly: Vec<Option<f64>> = (0..24)
        .map(|h| {
            let t = h as f64;
            let noise = ((h * 7919) % 13) as f64 / 13.0 - 0.5;
            Some(62.0 + 7.0 * (2.0 * PI * t / 24.0 - 1.2).sin() + 2.0 * (2.0 * PI * t / 12.0 + 0.4).sin() + noise)
        })
        .collect();
    let config = CircadianConfig::default();

    c.bench_function("fit_circadian_rhythm", |b| {
        b.iter(|| black_box(fit_circadian_rhythm(black_box(&hourly), &config)))
    });
}

criterion_group!(benches, bench_sleep_need, bench_debt_history, bench_circadian_fit);
criterion_main!(benches);
