//! Criterion micro-benchmarks for gondola CPU-bound hot paths.
//!
//! Run all:     `cargo bench`
//! Run subset:  `cargo bench -- pattern`
//! Save baseline: `cargo bench -- --save-baseline base`

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gondola::catalog::SnapshotStore;
use gondola::manifest::run_link;
use gondola::pattern::{compile_patterns, compile_template};
use gondola::types::{ManifestEntry, ObjectRecord};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn synthetic_patterns(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!(r"build-{i}/[a-z-]+/app-\d+\.\d+\.tar\.gz"))
        .collect()
}

fn synthetic_names(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 3 {
            0 => format!("build-{}/en-US/app-{}.0.tar.gz", i % 64, i % 10),
            1 => format!("logs/run-{i}.txt"),
            _ => format!("build-{}/de/app-{}.0.checksums", i % 64, i % 10),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// 1. Template compilation
// ---------------------------------------------------------------------------

fn bench_template_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_compile");

    let templates = [
        ("literal", "pub/firefox/releases/readme.txt"),
        ("one_var", "firefox-${version}.tar.bz2"),
        (
            "dense",
            "${path_platform}/${locale}/firefox-${version}-${build_number}.tar.bz2",
        ),
    ];
    for (label, template) in templates {
        group.bench_function(label, |bench| {
            bench.iter(|| compile_template(black_box(template)).unwrap());
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Pattern optimizer
// ---------------------------------------------------------------------------

fn bench_pattern_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_compile");

    for &n in &[5usize, 50, 500] {
        let patterns = synthetic_patterns(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("merged", n), &patterns, |bench, p| {
            bench.iter(|| compile_patterns(black_box(p), 20, 4096).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("individual", n), &patterns, |bench, p| {
            bench.iter(|| compile_patterns(black_box(p), usize::MAX, 4096).unwrap());
        });
    }
    group.finish();
}

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_matching");

    let patterns = synthetic_patterns(200);
    let names = synthetic_names(1000);
    let merged = compile_patterns(&patterns, 20, 4096).unwrap();
    let individual = compile_patterns(&patterns, usize::MAX, 4096).unwrap();

    group.throughput(Throughput::Elements(names.len() as u64));
    group.bench_function("merged_200_patterns", |bench| {
        bench.iter(|| {
            names
                .iter()
                .filter(|name| merged.matches(black_box(name)))
                .count()
        });
    });
    group.bench_function("individual_200_patterns", |bench| {
        bench.iter(|| {
            names
                .iter()
                .filter(|name| individual.matches(black_box(name)))
                .count()
        });
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Link run over a snapshot database
// ---------------------------------------------------------------------------

fn bench_link_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_run");
    group.sample_size(10);

    for &objects in &[1_000usize, 10_000] {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("bench.db"));
        let mut conn = store.create("bench", None, Utc::now()).unwrap();
        let records: Vec<ObjectRecord> = synthetic_names(objects)
            .into_iter()
            .map(|name| ObjectRecord {
                name,
                size: 1024,
                updated: None,
                time_created: None,
                custom_time: None,
            })
            .collect();
        SnapshotStore::insert_objects(&mut conn, &records).unwrap();

        let entries: Vec<ManifestEntry> = (0..20)
            .map(|i| {
                let template = format!("build-{i}/${{locale}}/app-${{version}}.tar.gz");
                ManifestEntry {
                    id: i as i64 + 1,
                    order: i as u32,
                    pretty_name: format!("App {i}"),
                    destination_path: template.clone(),
                    regex_pattern: compile_template(&template).unwrap(),
                }
            })
            .collect();

        group.throughput(Throughput::Elements(objects as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(objects),
            &objects,
            |bench, _| {
                bench.iter(|| {
                    run_link(&mut conn, "bench", black_box(&entries), 500, |_| true).unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_template_compile,
    bench_pattern_compile,
    bench_pattern_matching,
    bench_link_run
);
criterion_main!(benches);
