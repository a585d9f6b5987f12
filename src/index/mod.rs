//! Similarity index backends.
//!
//! Provides the abstraction layer for the vector index primitive owned by
//! the engine, plus the supplied exact backend.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Complexity |
//! |---------|----------|------------|
//! | [`FlatIndex`] | Exact L2² scan, reference backend | O(n) per query |
//!
//! # Implementor Notes
//!
//! - Methods take `&self` so the engine can share the index across its
//!   lock domains; implementations use interior mutability.
//! - Duplicate ids are allowed: `add_with_ids` appends unconditionally,
//!   `remove_ids` removes every occurrence, and `reconstruct` returns the
//!   most recently added occurrence.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use vecdex::index::{FlatIndex, SimilarityIndex, VectorBatch};
//!
//! let index = FlatIndex::new(4);
//! let batch = VectorBatch::new(vec![0.0, 0.0, 0.0, 1.0], 1, 4)?;
//! index.add_with_ids(&batch, &[0])?;
//!
//! let hits = index.search(&batch, 1)?;
//! assert_eq!(hits.ids[0], 0);
//! ```

mod flat;

pub use flat::FlatIndex;

use crate::{Error, Result};
use std::path::Path;

/// A validated `(rows, dim)` matrix of vectors in row-major order.
///
/// Produced by the engine's validator; `data.len() == rows * dim` always
/// holds for a constructed batch. An empty input keeps the engine's `dim`
/// with `rows == 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    /// Row-major vector data.
    pub data: Vec<f32>,
    /// Number of vectors in the batch.
    pub rows: usize,
    /// Dimensionality of each vector.
    pub dim: usize,
}

impl VectorBatch {
    /// Creates a batch from row-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len() != rows * dim`.
    pub fn new(data: Vec<f32>, rows: usize, dim: usize) -> Result<Self> {
        if data.len() != rows * dim {
            return Err(Error::InvalidInput(format!(
                "batch data length {} does not match {rows} rows of dimension {dim}",
                data.len()
            )));
        }
        Ok(Self { data, rows, dim })
    }

    /// Creates an empty batch of the given dimensionality.
    #[must_use]
    pub const fn empty(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            dim,
        }
    }

    /// Returns the vector at `row` as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows`.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    /// Returns true if the batch holds no vectors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Result rows of a batched k-nearest-neighbor search.
///
/// Both fields are row-major `(queries, k)` matrices. Rows with fewer than
/// `k` neighbors are padded with `f32::INFINITY` distances and `-1` ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatches {
    /// Squared L2 distances, ascending within each row.
    pub distances: Vec<f32>,
    /// Matching ids; `-1` marks an unfilled slot.
    pub ids: Vec<i64>,
}

/// Trait for similarity index backends.
///
/// The engine owns exactly one `Box<dyn SimilarityIndex>` and serializes
/// structural mutations through its lock domains; implementations still
/// carry their own interior synchronization so a search overlapping a
/// mutation stays memory-safe.
pub trait SimilarityIndex: Send + Sync {
    /// The dimensionality of indexed vectors.
    fn dimension(&self) -> usize;

    /// Returns the number of stored vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the index state is inaccessible.
    fn count(&self) -> Result<usize>;

    /// Appends the batch under the given ids, one id per row.
    ///
    /// Ids already present are not replaced; the new rows are appended
    /// after them.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or when `ids.len()` differs
    /// from the batch row count.
    fn add_with_ids(&self, batch: &VectorBatch, ids: &[i64]) -> Result<()>;

    /// Removes every occurrence of the given ids.
    ///
    /// Returns the number of rows actually removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the index state is inaccessible.
    fn remove_ids(&self, ids: &[i64]) -> Result<usize>;

    /// Batched k-nearest-neighbor search.
    ///
    /// Returns `(queries, k)` result matrices; see [`SearchMatches`] for
    /// the padding contract.
    ///
    /// # Errors
    ///
    /// Returns an error on query dimension mismatch.
    fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchMatches>;

    /// Returns the stored vector for `id`, or `None` if absent.
    ///
    /// Reconstruct support is best-effort: implementations may only
    /// track rows added through this instance, so an index loaded from
    /// a snapshot typically returns `None` for its persisted rows. With
    /// duplicate ids, the most recently added occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the index state is inaccessible.
    fn reconstruct(&self, id: i64) -> Result<Option<Vec<f32>>>;

    /// Writes a point-in-time snapshot of the index to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    fn save_to(&self, path: &Path) -> Result<()>;
}

/// Factory for index backends.
///
/// The engine replaces its live index wholesale on `clear_index`,
/// `load_index`, and `restore_from_backup`; the factory is the single
/// place that knows how to produce one.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexFactory;

impl IndexFactory {
    /// Creates an empty flat index of the given dimensionality.
    #[must_use]
    pub fn empty(dimension: usize) -> Box<dyn SimilarityIndex> {
        Box::new(FlatIndex::new(dimension))
    }

    /// Loads an index snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// snapshot's dimensionality differs from `expected_dim`.
    pub fn load(path: &Path, expected_dim: usize) -> Result<Box<dyn SimilarityIndex>> {
        let index = FlatIndex::load_from(path)?;
        if index.dimension() != expected_dim {
            return Err(Error::InvalidInput(format!(
                "index dimension mismatch: expected {expected_dim}, got {}",
                index.dimension()
            )));
        }
        Ok(Box::new(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_new_checks_shape() {
        let batch = VectorBatch::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        assert_eq!(batch.rows, 2);
        assert_eq!(batch.row(1), &[3.0, 4.0]);

        let result = VectorBatch::new(vec![1.0, 2.0, 3.0], 2, 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_empty() {
        let batch = VectorBatch::empty(384);
        assert!(batch.is_empty());
        assert_eq!(batch.dim, 384);
        assert_eq!(batch.data.len(), 0);
    }

    #[test]
    fn test_factory_empty() {
        let index = IndexFactory::empty(16);
        assert_eq!(index.dimension(), 16);
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_factory_load_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatIndex::new(8);
        index.save_to(&path).unwrap();

        let result = IndexFactory::load(&path, 16);
        assert!(result.is_err());

        let loaded = IndexFactory::load(&path, 8).unwrap();
        assert_eq!(loaded.dimension(), 8);
    }
}
