//! Micro-benchmarks for durawal core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- write     # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use durawal::{Wal, WalOptions};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Default record payload (128 bytes).
const RECORD_128B: &[u8; 128] = &[0xAB; 128];

/// Larger record payload (4 KiB).
const RECORD_4K: &[u8; 4096] = &[0xCD; 4096];

/// Opens a WAL with no automatic sync policy, so benchmark iterations
/// measure raw append cost without fsync noise.
fn open_unsynced(dir: &std::path::Path) -> Wal {
    Wal::open(WalOptions::new(dir)).expect("open")
}

/// Opens a WAL that syncs every write, measuring the durable path.
fn open_sync_per_write(dir: &std::path::Path) -> Wal {
    let mut options = WalOptions::new(dir);
    options.sync_per_write = true;
    Wal::open(options).expect("open")
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

/// Benchmark group for `write` operations.
///
/// # Sub-benchmarks
///
/// ## `buffered/128B` and `buffered/4K`
///
/// **Scenario:** Appends records with no sync policy active, so each
/// iteration measures pure chunk-encoding and `write_all` cost.
///
/// **What it measures:** The in-memory chunking and buffered-write path,
/// isolated from fsync latency.
///
/// ## `sync_per_write/128B`
///
/// **Scenario:** Same as `buffered/128B` but with `sync_per_write` set, so
/// every write fsyncs the active segment before returning.
///
/// **What it measures:** The fully durable write path. Expect this to
/// dominate over the buffered variant on any real disk.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    for &(label, record) in &[("128B", RECORD_128B.as_slice()), ("4K", RECORD_4K.as_slice())] {
        group.throughput(Throughput::Bytes(record.len() as u64));
        group.bench_function(BenchmarkId::new("buffered", label), |b| {
            let dir = TempDir::new().unwrap();
            let wal = open_unsynced(dir.path());
            b.iter(|| {
                black_box(wal.write(black_box(record)).unwrap());
            });
        });
    }

    group.bench_function("sync_per_write/128B", |b| {
        let dir = TempDir::new().unwrap();
        let wal = open_sync_per_write(dir.path());
        b.iter(|| {
            black_box(wal.write(black_box(RECORD_128B.as_slice())).unwrap());
        });
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

/// Benchmark group for `read` operations.
///
/// # Sub-benchmarks
///
/// ## `single_chunk` and `multi_chunk`
///
/// **Scenario:** Reads randomly from 10,000 previously written records,
/// either small enough to fit one chunk or large enough to span several.
///
/// **What it measures:** Positional-read (`pread`) and chunk-chain
/// reconstruction cost, including CRC verification.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    {
        let dir = TempDir::new().unwrap();
        let wal = open_unsynced(dir.path());
        let n = 10_000u64;
        let locations: Vec<_> = (0..n).map(|_| wal.write(RECORD_128B.as_slice()).unwrap()).collect();

        group.bench_function("single_chunk", |b| {
            let mut i = 0usize;
            b.iter(|| {
                let loc = locations[i % locations.len()];
                let _ = black_box(wal.read_at(black_box(loc)).unwrap());
                i += 1;
            });
        });
    }

    {
        let dir = TempDir::new().unwrap();
        let mut options = WalOptions::new(dir.path());
        options.max_segment_size = 64 * 1024 * 1024;
        let wal = Wal::open(options).unwrap();
        let big_record = vec![0xEEu8; 3 * 32 * 1024];
        let n = 2_000u64;
        let locations: Vec<_> = (0..n).map(|_| wal.write(&big_record).unwrap()).collect();

        group.bench_function("multi_chunk", |b| {
            let mut i = 0usize;
            b.iter(|| {
                let loc = locations[i % locations.len()];
                let _ = black_box(wal.read_at(black_box(loc)).unwrap());
                i += 1;
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Rollover benchmark
// ================================================================================================

/// Benchmark group for segment rollover overhead.
///
/// # Sub-benchmarks
///
/// ## `forced_every_write`
///
/// **Scenario:** A tiny `max_segment_size` forces a new segment to be
/// created on (nearly) every write.
///
/// **What it measures:** The cost of `Segment::open` plus roster
/// bookkeeping, isolated from steady-state append cost.
fn bench_rollover(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollover");
    group.sample_size(20);

    group.bench_function("forced_every_write", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let mut options = WalOptions::new(dir.path());
                options.max_segment_size = 64;
                let wal = Wal::open(options).unwrap();
                (dir, wal)
            },
            |(_dir, wal)| {
                for _ in 0..50 {
                    black_box(wal.write(black_box(b"x".repeat(40).as_slice())).unwrap());
                }
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

// ================================================================================================
// Reopen (recovery) benchmark
// ================================================================================================

/// Benchmark group for WAL reopen (roster recovery) latency.
///
/// # Sub-benchmarks
///
/// ## `open_existing/{10,100}_segments`
///
/// **Scenario:** A WAL directory already holds N sealed segments. Each
/// iteration reopens it, which scans the directory and loads every
/// segment's current size.
///
/// **What it measures:** Cold-start recovery cost as segment count grows.
fn bench_reopen(c: &mut Criterion) {
    let mut group = c.benchmark_group("reopen");
    group.sample_size(10);

    for &segment_count in &[10u64, 100] {
        let label = format!("{segment_count}_segments");
        group.bench_function(BenchmarkId::new("open_existing", label), |b| {
            let dir = TempDir::new().unwrap();
            {
                let mut options = WalOptions::new(dir.path());
                options.max_segment_size = 64 * 1024;
                let wal = Wal::open(options).unwrap();
                while (wal.active_segment_id().unwrap_or(0) as u64) < segment_count {
                    wal.write(&[0u8; 60 * 1024]).unwrap();
                }
            }

            b.iter(|| {
                let wal = Wal::open(WalOptions::new(dir.path())).unwrap();
                black_box(&wal);
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Concurrent writers benchmark
// ================================================================================================

/// Benchmark group for concurrent write throughput.
///
/// # Sub-benchmarks
///
/// ## `writers/{1,2,4}`
///
/// **Scenario:** N threads each append 200 records concurrently to one
/// shared `Arc<Wal>`, no sync policy active.
///
/// **What it measures:** Write-path scaling under contention on the
/// roster `RwLock`. Since every write takes it exclusively, throughput
/// is expected to be roughly flat rather than scale with thread count.
fn bench_concurrent_writers(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for &num_writers in &[1u32, 2, 4] {
        group.bench_function(BenchmarkId::new("writers", num_writers), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let wal = Arc::new(open_unsynced(dir.path()));
                    (dir, wal)
                },
                |(_dir, wal)| {
                    let mut handles = Vec::new();
                    for _ in 0..num_writers {
                        let wal = Arc::clone(&wal);
                        handles.push(std::thread::spawn(move || {
                            for _ in 0..200u64 {
                                wal.write(RECORD_128B.as_slice()).unwrap();
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Background sync overhead
// ================================================================================================

/// Benchmark group measuring write throughput with a periodic background
/// sync thread active versus disabled.
///
/// # Sub-benchmarks
///
/// ## `background_sync_disabled` and `background_sync_10ms`
///
/// **What it measures:** Whether a running background sync thread adds
/// measurable overhead to the foreground write path, since both contend
/// on the same roster `RwLock` for shared access during a sync pass.
fn bench_background_sync_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("background_sync");

    group.bench_function("disabled", |b| {
        let dir = TempDir::new().unwrap();
        let wal = open_unsynced(dir.path());
        b.iter(|| {
            black_box(wal.write(black_box(RECORD_128B.as_slice())).unwrap());
        });
    });

    group.bench_function("interval_10ms", |b| {
        let dir = TempDir::new().unwrap();
        let mut options = WalOptions::new(dir.path());
        options.sync_interval = Duration::from_millis(10);
        let wal = Wal::open(options).unwrap();
        b.iter(|| {
            black_box(wal.write(black_box(RECORD_128B.as_slice())).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_write,
    bench_read,
    bench_rollover,
    bench_reopen,
    bench_concurrent_writers,
    bench_background_sync_overhead,
);

criterion_main!(benches);
