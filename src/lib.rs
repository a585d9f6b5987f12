//! # Vecdex
//!
//! A durable vector index engine.
//!
//! Vecdex pairs an in-process similarity-search index with a write-ahead
//! log (WAL), an async locking discipline, and a non-blocking backup
//! mechanism, so embedding collections survive restarts without stalling
//! writers.
//!
//! ## Features
//!
//! - Fixed-dimension vector validation before any index mutation
//! - Append-only, rotating WAL with full-state replay
//! - Three independent async lock domains (mutation, snapshot, direct access)
//! - Point-in-time backups taken without blocking concurrent writers
//! - Auto-save scheduling with observable background task outcomes
//! - Thin command adapter translating structured queries into engine calls
//!
//! ## Example
//!
//! ```rust,ignore
//! use vecdex::{EngineConfig, VectorEngine};
//!
//! let config = EngineConfig::new().with_dimension(384);
//! let engine = VectorEngine::open(config).await?;
//! let ids = engine.add_vectors(vec![vec![0.1; 384]]).await?;
//! let hits = engine.search_vectors(vec![vec![0.1; 384]], 5).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod commands;
pub mod config;
pub mod engine;
pub mod index;
pub mod observability;
pub mod wal;

// Re-exports for convenience
pub use commands::{CommandHandler, CommandResponse, VectorCommand};
pub use config::EngineConfig;
pub use engine::{MetricsSnapshot, VectorEngine};
pub use index::{FlatIndex, IndexFactory, SearchMatches, SimilarityIndex, VectorBatch};
pub use wal::{WalEntry, WalOperation, WalService};

/// Error type for vecdex operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. Every variant names the operation that failed and
/// carries a human-readable cause; no operation ever returns a
/// half-populated success.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `VectorSize` | A vector's dimension does not match the engine's |
/// | `Index` | The underlying similarity index rejects an add/remove |
/// | `Search` | `k` is zero or the index search call fails |
/// | `Storage` | Save/load/backup/restore I/O fails, backup file missing |
/// | `BatchPartial` | Some items of a batch succeeded while others failed |
/// | `InvalidInput` | Malformed command payloads, dimension-mismatched snapshots |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A vector's trailing dimension did not match the engine's.
    ///
    /// Raised before the index is touched; the offending batch position
    /// and both sizes are preserved for the caller.
    #[error(
        "operation '{operation}' rejected vector {index}: expected dimension {expected}, got {actual}"
    )]
    VectorSize {
        /// The operation that performed the validation.
        operation: String,
        /// Position of the offending vector within the batch.
        index: usize,
        /// The engine's fixed dimension.
        expected: usize,
        /// The dimension actually supplied.
        actual: usize,
    },

    /// The underlying similarity index failed a structural operation.
    #[error("index operation '{operation}' failed: {cause}")]
    Index {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A search could not be executed.
    ///
    /// Raised when `k` is zero or the index's batched k-NN call fails.
    #[error("search operation '{operation}' failed: {cause}")]
    Search {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A persistence operation failed.
    ///
    /// Raised when:
    /// - The index file cannot be written or read
    /// - A backup target cannot be created
    /// - A restore source does not exist
    /// - WAL files cannot be enumerated during replay or cleanup
    /// - The log file or subscriber cannot be set up
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Some items of a batch succeeded while others failed.
    ///
    /// Both lists are reported so the caller can retry precisely.
    #[error(
        "batch operation '{operation}' partially failed: {} succeeded, {} failed",
        succeeded.len(),
        failed.len()
    )]
    BatchPartial {
        /// The batch operation that partially failed.
        operation: String,
        /// Ids assigned to the items that were applied.
        succeeded: Vec<u64>,
        /// Reasons for the items that were rejected.
        failed: Vec<String>,
    },

    /// Invalid input was provided to the command adapter or a load.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for vecdex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp as fractional seconds.
///
/// WAL entries and metrics store wall-clock times as `f64` seconds since
/// the epoch. Uses `SystemTime::now()` with fallback to `0.0` if the
/// system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::VectorSize {
            operation: "add_vectors".to_string(),
            index: 2,
            expected: 384,
            actual: 128,
        };
        let display = format!("{err}");
        assert!(display.contains("add_vectors"));
        assert!(display.contains("vector 2"));
        assert!(display.contains("384"));
        assert!(display.contains("128"));

        let err = Error::Storage {
            operation: "restore_from_backup".to_string(),
            cause: "backup file not found".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("restore_from_backup"));
        assert!(display.contains("backup file not found"));

        let err = Error::Search {
            operation: "search_vectors".to_string(),
            cause: "k must be greater than zero".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("search_vectors"));
        assert!(display.contains("k must be greater than zero"));
    }

    #[test]
    fn test_batch_partial_counts_both_lists() {
        let err = Error::BatchPartial {
            operation: "upsert".to_string(),
            succeeded: vec![0, 1, 2],
            failed: vec!["vector 3: expected dimension 4, got 2".to_string()],
        };
        let display = format!("{err}");
        assert!(display.contains("3 succeeded"));
        assert!(display.contains("1 failed"));
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        let ts = current_timestamp();
        assert!(ts > 1_600_000_000.0);
    }
}
