//! Performance benchmarks for crondog
//!
//! Run with: cargo bench

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use criterion::{criterion_group, criterion_main, Criterion};
use crondog::{
    CronExpression, LivenessProbe, ProbeError, ServiceSchedule, Settings, StaticCrontab,
    Supervisor,
};

fn reference() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("CronExpression::parse", |b| {
        b.iter(|| CronExpression::parse("*/15 9-17 * 1,4,7,10 1-5").unwrap());
    });
}

fn bench_next_occurrence(c: &mut Criterion) {
    let now = reference();

    let mut group = c.benchmark_group("next_occurrence");
    for (label, expr) in [
        ("every minute", "* * * * *"),
        ("daily", "0 9 * * *"),
        ("weekly", "0 9 * * 1"),
        ("yearly", "0 0 1 1 *"),
    ] {
        let cron = CronExpression::parse(expr).unwrap();
        group.bench_function(label, |b| {
            b.iter(|| cron.next_occurrence(now).unwrap());
        });
    }
    group.finish();
}

fn bench_lookback(c: &mut Criterion) {
    let now = reference();
    let cron = CronExpression::parse("0 9 * * *").unwrap();

    c.bench_function("last_occurrence (7d lookback)", |b| {
        b.iter(|| cron.last_occurrence_at_or_before(now, Duration::days(7)));
    });

    let jobs: Vec<_> = [
        "0 9 * * * app --name X start",
        "0 17 * * * app --name X stop",
    ]
    .iter()
    .map(|l| crondog::ScheduledJob::from_line(l).unwrap())
    .collect();
    let schedule = ServiceSchedule::from_jobs("X", &jobs);

    c.bench_function("is_starting", |b| {
        b.iter(|| schedule.is_starting(now, Duration::minutes(5)).unwrap());
    });
}

struct AlwaysUp;

#[async_trait]
impl LivenessProbe for AlwaysUp {
    async fn is_alive(&self, _service: &str) -> Result<bool, ProbeError> {
        Ok(true)
    }
}

fn bench_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("tick");
    for count in [1, 10, 50] {
        let mut lines = Vec::new();
        for i in 0..count {
            lines.push(format!("0 9 * * * app --name svc{i} start"));
            lines.push(format!("0 17 * * * app --name svc{i} stop"));
        }
        let (sup, _) = Supervisor::new(
            &Settings::default(),
            Arc::new(StaticCrontab::new(lines)),
            Arc::new(AlwaysUp),
        )
        .unwrap();
        let sup = tokio::sync::Mutex::new(sup);

        group.bench_function(format!("{} services", count), |b| {
            b.to_async(&rt)
                .iter(|| async { sup.lock().await.tick_at(reference()).await });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_next_occurrence,
    bench_lookback,
    bench_tick,
);
criterion_main!(benches);
