use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::fs;
use std::path::Path;

use backsuite_core::naming::is_archive_of;
use backsuite_core::{BackupJob, RunTimestamp};
use backsuite_engine::RetentionManager;
use chrono::{Duration, NaiveDate};

/// `count` daily archives of `job`, plus the same number for a neighbouring job.
fn seed(dir: &Path, job: &str, count: usize) {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap();
    for i in 0..count {
        let at = RunTimestamp::from_datetime(start + Duration::days(i as i64));
        fs::write(dir.join(format!("{job}_{at}.zip")), b"").unwrap();
        fs::write(dir.join(format!("Other_{at}.zip")), b"").unwrap();
    }
}

fn bench_list_archives(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_archives");
    let manager = RetentionManager::new();

    for count in [100usize, 1_000, 5_000] {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "Docs", count);
        group.throughput(Throughput::Elements((count * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| manager.list_archives(black_box(dir.path()), "Docs", "zip").unwrap());
        });
    }

    group.finish();
}

fn bench_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotate");
    let manager = RetentionManager::new();
    let (events, _rx) = backsuite_events::channel();

    for count in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("keep_3", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    seed(dir.path(), "Docs", count);
                    dir
                },
                |dir| {
                    let job = BackupJob::new("Docs", "/unused", dir.path());
                    manager.rotate(&job, 3, "zip", &events).unwrap()
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_name_matching(c: &mut Criterion) {
    let names: Vec<String> = (0..1_000)
        .map(|i| format!("{}_2024-01-01_09-00-{:02}.zip", if i % 2 == 0 { "Docs" } else { "Pics" }, i % 60))
        .collect();

    c.bench_function("is_archive_of_1000", |b| {
        b.iter(|| {
            names
                .iter()
                .filter(|n| is_archive_of(black_box(n), "Docs", "zip"))
                .count()
        });
    });
}

criterion_group!(benches, bench_list_archives, bench_rotate, bench_name_matching);
criterion_main!(benches);
