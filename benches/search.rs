//! Benchmarks for vector search operations.
//!
//! Benchmark targets:
//! - 100 vectors: <1ms
//! - 1,000 vectors: <5ms
//! - 10,000 vectors: <50ms
//!
//! These benchmarks cover the raw flat-index scan and the full engine
//! path including lock domains and result shaping.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::print_stderr)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Runtime;

use vecdex::config::EngineConfig;
use vecdex::{FlatIndex, SimilarityIndex, VectorBatch, VectorEngine};

const DIMENSION: usize = 128;

// ============================================================================
// Helper Functions
// ============================================================================

/// Deterministic pseudo-random vector so runs are comparable.
fn pseudo_vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    (0..dim)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state % 2000) as f32 / 1000.0) - 1.0
        })
        .collect()
}

/// Builds a flat index populated with `count` vectors.
fn populated_index(count: usize) -> FlatIndex {
    let index = FlatIndex::new(DIMENSION);
    let mut data = Vec::with_capacity(count * DIMENSION);
    for i in 0..count {
        data.extend_from_slice(&pseudo_vector(i as u64, DIMENSION));
    }
    let batch = VectorBatch::new(data, count, DIMENSION).expect("valid batch");
    let ids: Vec<i64> = (0..count as i64).collect();
    index.add_with_ids(&batch, &ids).expect("populate failed");
    index
}

/// Opens an engine over a temp directory and fills it with `count` vectors.
fn populated_engine(rt: &Runtime, dir: &TempDir, count: usize) -> VectorEngine {
    let config = EngineConfig::new()
        .with_data_dir(dir.path())
        .with_dimension(DIMENSION)
        .with_auto_save_interval(0);

    rt.block_on(async {
        let engine = VectorEngine::open(config).await.expect("open failed");
        for chunk_start in (0..count).step_by(500) {
            let chunk_end = (chunk_start + 500).min(count);
            let rows: Vec<Vec<f32>> = (chunk_start..chunk_end)
                .map(|i| pseudo_vector(i as u64, DIMENSION))
                .collect();
            engine.add_vectors(rows).await.expect("populate failed");
        }
        engine
    })
}

// ============================================================================
// Flat Index Benchmarks
// ============================================================================

fn bench_flat_scan_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_scan");
    group.measurement_time(Duration::from_secs(10));

    for count in &[100usize, 1_000, 10_000] {
        let index = populated_index(*count);
        let query = VectorBatch::new(pseudo_vector(99_999, DIMENSION), 1, DIMENSION).unwrap();

        group.bench_with_input(BenchmarkId::new("k10", count), count, |b, _| {
            b.iter(|| {
                index
                    .search(black_box(&query), 10)
                    .expect("search should succeed")
            });
        });
    }

    group.finish();
}

fn bench_flat_scan_k(c: &mut Criterion) {
    let index = populated_index(1_000);
    let query = VectorBatch::new(pseudo_vector(99_999, DIMENSION), 1, DIMENSION).unwrap();

    let mut group = c.benchmark_group("flat_scan_k");
    group.measurement_time(Duration::from_secs(10));

    for k in &[1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(k), k, |b, &k| {
            b.iter(|| {
                index
                    .search(black_box(&query), k)
                    .expect("search should succeed")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_engine_search(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = populated_engine(&rt, &temp_dir, 1_000);

    let mut group = c.benchmark_group("engine_search_1000_vectors");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("single_query", |b| {
        let query = pseudo_vector(99_999, DIMENSION);
        b.iter(|| {
            rt.block_on(engine.search_vectors(black_box(vec![query.clone()]), 10))
                .expect("search should succeed")
        });
    });

    group.bench_function("batched_8_queries", |b| {
        let queries: Vec<Vec<f32>> = (0..8)
            .map(|i| pseudo_vector(90_000 + i, DIMENSION))
            .collect();
        b.iter(|| {
            rt.block_on(engine.search_vectors(black_box(queries.clone()), 10))
                .expect("search should succeed")
        });
    });

    group.finish();
}

fn bench_engine_reconstruct(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = populated_engine(&rt, &temp_dir, 1_000);

    let mut group = c.benchmark_group("engine_reconstruct");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("hit", |b| {
        b.iter(|| {
            rt.block_on(engine.reconstruct_vector(black_box(500)))
                .expect("reconstruct should succeed")
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_flat_scan_scaling,
    bench_flat_scan_k,
    bench_engine_search,
    bench_engine_reconstruct,
);
criterion_main!(benches);
