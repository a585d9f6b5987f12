//! Engine operation counters.
//!
//! Counters are plain relaxed atomics bumped while the relevant lock
//! domain is held and read without any locking; the same events are
//! mirrored to the `metrics` facade so an embedding process can attach
//! whatever recorder it already runs.

use crate::current_timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters owned by the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    add_operations: AtomicU64,
    vectors_added: AtomicU64,
    search_operations: AtomicU64,
    search_queries: AtomicU64,
    delete_operations: AtomicU64,
    vectors_deleted: AtomicU64,
    out_of_range_deletes: AtomicU64,
    wal_append_failures: AtomicU64,
    save_count: AtomicU64,
    auto_save_count: AtomicU64,
    total_vectors: AtomicU64,
    // f64 bit patterns; 0 means "never"
    last_save_timestamp: AtomicU64,
    last_backup_timestamp: AtomicU64,
    backup_count: AtomicU64,
    backup_duration_total_ms: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Number of successful add batches.
    pub add_operations: u64,
    /// Total vectors added across all batches.
    pub vectors_added: u64,
    /// Number of search calls.
    pub search_operations: u64,
    /// Total query rows across all search calls.
    pub search_queries: u64,
    /// Number of delete calls.
    pub delete_operations: u64,
    /// Total vectors actually removed.
    pub vectors_deleted: u64,
    /// Delete requests that named an id at or beyond the current count.
    pub out_of_range_deletes: u64,
    /// WAL appends that failed and were swallowed.
    pub wal_append_failures: u64,
    /// Completed index saves, foreground and background alike.
    pub save_count: u64,
    /// Background saves triggered by the auto-save counter.
    pub auto_save_count: u64,
    /// Vectors currently in the index.
    pub total_vectors: u64,
    /// Unix seconds of the last completed save, `0.0` if never.
    pub last_save_timestamp: f64,
    /// Unix seconds of the last completed backup, `0.0` if never.
    pub last_backup_timestamp: f64,
    /// Number of completed backups.
    pub backup_count: u64,
    /// Running average backup duration in milliseconds.
    pub avg_backup_duration_ms: f64,
}

impl EngineMetrics {
    /// Creates a zeroed metrics block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful add batch.
    pub fn record_add(&self, vectors: u64, duration: Duration) {
        self.add_operations.fetch_add(1, Ordering::Relaxed);
        self.vectors_added.fetch_add(vectors, Ordering::Relaxed);
        metrics::counter!("vector_add_total", "status" => "success").increment(1);
        metrics::counter!("vectors_added_total").increment(vectors);
        metrics::histogram!("vector_add_duration_ms").record(duration.as_secs_f64() * 1000.0);
    }

    /// Records a search call.
    pub fn record_search(&self, queries: u64, duration: Duration) {
        self.search_operations.fetch_add(1, Ordering::Relaxed);
        self.search_queries.fetch_add(queries, Ordering::Relaxed);
        metrics::counter!("vector_search_total", "status" => "success").increment(1);
        metrics::counter!("vector_search_queries_total").increment(queries);
        metrics::histogram!("vector_search_duration_ms").record(duration.as_secs_f64() * 1000.0);
    }

    /// Records a delete call and how many of its ids were out of range.
    pub fn record_delete(&self, removed: u64, out_of_range: u64, duration: Duration) {
        self.delete_operations.fetch_add(1, Ordering::Relaxed);
        self.vectors_deleted.fetch_add(removed, Ordering::Relaxed);
        self.out_of_range_deletes
            .fetch_add(out_of_range, Ordering::Relaxed);
        metrics::counter!("vector_delete_total", "status" => "success").increment(1);
        metrics::counter!("vectors_deleted_total").increment(removed);
        if out_of_range > 0 {
            metrics::counter!("vector_delete_out_of_range_total").increment(out_of_range);
        }
        metrics::histogram!("vector_delete_duration_ms").record(duration.as_secs_f64() * 1000.0);
    }

    /// Records a swallowed WAL append failure.
    pub fn record_wal_append_failure(&self) {
        self.wal_append_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("wal_append_failures_total").increment(1);
    }

    /// Records a background save triggered by the auto-save counter.
    pub fn record_auto_save(&self) {
        self.auto_save_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("index_auto_save_total").increment(1);
    }

    /// Records a completed save.
    pub fn record_save(&self) {
        self.save_count.fetch_add(1, Ordering::Relaxed);
        self.last_save_timestamp
            .store(current_timestamp().to_bits(), Ordering::Relaxed);
        metrics::counter!("index_save_total", "status" => "success").increment(1);
    }

    /// Records a completed backup and folds its duration into the average.
    pub fn record_backup(&self, duration: Duration) {
        self.backup_count.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.backup_duration_total_ms
            .fetch_add(millis, Ordering::Relaxed);
        self.last_backup_timestamp
            .store(current_timestamp().to_bits(), Ordering::Relaxed);
        metrics::counter!("index_backup_total", "status" => "success").increment(1);
        metrics::histogram!("index_backup_duration_ms").record(duration.as_secs_f64() * 1000.0);
    }

    /// Updates the live vector count after a mutation or a reload.
    pub fn set_total_vectors(&self, count: u64) {
        self.total_vectors.store(count, Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("index_vectors").set(count as f64);
    }

    /// Takes a lock-free snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let backup_count = self.backup_count.load(Ordering::Relaxed);
        let total_ms = self.backup_duration_total_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            add_operations: self.add_operations.load(Ordering::Relaxed),
            vectors_added: self.vectors_added.load(Ordering::Relaxed),
            search_operations: self.search_operations.load(Ordering::Relaxed),
            search_queries: self.search_queries.load(Ordering::Relaxed),
            delete_operations: self.delete_operations.load(Ordering::Relaxed),
            vectors_deleted: self.vectors_deleted.load(Ordering::Relaxed),
            out_of_range_deletes: self.out_of_range_deletes.load(Ordering::Relaxed),
            wal_append_failures: self.wal_append_failures.load(Ordering::Relaxed),
            save_count: self.save_count.load(Ordering::Relaxed),
            auto_save_count: self.auto_save_count.load(Ordering::Relaxed),
            total_vectors: self.total_vectors.load(Ordering::Relaxed),
            last_save_timestamp: f64::from_bits(self.last_save_timestamp.load(Ordering::Relaxed)),
            last_backup_timestamp: f64::from_bits(
                self.last_backup_timestamp.load(Ordering::Relaxed),
            ),
            backup_count,
            avg_backup_duration_ms: average_ms(total_ms, backup_count),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn average_ms(total_ms: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_ms as f64 / count as f64
    }
}
