//! Exact flat similarity index.
//!
//! Brute-force O(n) squared-L2 scan over parallel id/vector arrays. This
//! is deliberately not an approximate-nearest-neighbor structure; it is
//! the exact reference backend the engine wraps with durability.

use super::{SearchMatches, SimilarityIndex, VectorBatch};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

/// On-disk snapshot layout, `bincode`-encoded.
///
/// Only the rows themselves are persisted. The id map is a
/// session-local structure, so an index loaded from a snapshot cannot
/// reconstruct rows it did not add itself.
#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dim: usize,
    ids: Vec<i64>,
    data: Vec<f32>,
}

/// Mutable rows behind the interior lock.
///
/// `ids` and `data` are parallel: row `i` owns `data[i*dim..(i+1)*dim]`.
/// `direct` maps an id to the row that can serve its reconstruction; it
/// tracks only rows added through this instance.
#[derive(Debug, Default)]
struct FlatState {
    ids: Vec<i64>,
    data: Vec<f32>,
    direct: HashMap<i64, usize>,
}

/// Exact squared-L2 scan index.
///
/// Rows are append-only between removals; duplicate ids are allowed and
/// stack in insertion order. The interior `RwLock` keeps concurrent
/// searches and mutations memory-safe; ordering between them is the
/// engine's concern, not this type's.
pub struct FlatIndex {
    dim: usize,
    state: RwLock<FlatState>,
}

impl FlatIndex {
    /// Creates an empty index of the given dimensionality.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dim: dimension,
            state: RwLock::new(FlatState::default()),
        }
    }

    /// Loads an index from a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::Storage {
            operation: "read_index_snapshot".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

        let snapshot: FlatSnapshot =
            bincode::deserialize(&bytes).map_err(|e| Error::Storage {
                operation: "decode_index_snapshot".to_string(),
                cause: e.to_string(),
            })?;

        if snapshot.data.len() != snapshot.ids.len() * snapshot.dim {
            return Err(Error::Storage {
                operation: "decode_index_snapshot".to_string(),
                cause: format!(
                    "snapshot rows are inconsistent: {} ids, {} floats, dimension {}",
                    snapshot.ids.len(),
                    snapshot.data.len(),
                    snapshot.dim
                ),
            });
        }

        // The id map starts empty: snapshots carry rows only, so
        // reconstruction resumes with rows added after the load
        Ok(Self {
            dim: snapshot.dim,
            state: RwLock::new(FlatState {
                ids: snapshot.ids,
                data: snapshot.data,
                direct: HashMap::new(),
            }),
        })
    }

    /// Squared L2 distance between two equal-length slices.
    fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }

    fn poisoned(operation: &str) -> Error {
        Error::Index {
            operation: operation.to_string(),
            cause: "index lock poisoned".to_string(),
        }
    }
}

impl SimilarityIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn count(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| Self::poisoned("count"))?;
        Ok(state.ids.len())
    }

    fn add_with_ids(&self, batch: &VectorBatch, ids: &[i64]) -> Result<()> {
        if batch.dim != self.dim {
            return Err(Error::Index {
                operation: "add_with_ids".to_string(),
                cause: format!(
                    "batch dimension {} does not match index dimension {}",
                    batch.dim, self.dim
                ),
            });
        }
        if ids.len() != batch.rows {
            return Err(Error::Index {
                operation: "add_with_ids".to_string(),
                cause: format!("expected {} ids, got {}", batch.rows, ids.len()),
            });
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| Self::poisoned("add_with_ids"))?;
        let base = state.ids.len();
        state.ids.extend_from_slice(ids);
        state.data.extend_from_slice(&batch.data);
        // Newest occurrence wins when an id is added more than once
        for (offset, &id) in ids.iter().enumerate() {
            state.direct.insert(id, base + offset);
        }
        Ok(())
    }

    fn remove_ids(&self, ids: &[i64]) -> Result<usize> {
        let to_remove: HashSet<i64> = ids.iter().copied().collect();
        if to_remove.is_empty() {
            return Ok(0);
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| Self::poisoned("remove_ids"))?;

        let mut kept_ids = Vec::with_capacity(state.ids.len());
        let mut kept_data = Vec::with_capacity(state.data.len());
        let mut direct = HashMap::with_capacity(state.direct.len());
        for (row, &id) in state.ids.iter().enumerate() {
            if !to_remove.contains(&id) {
                // The map keeps following only the rows it already tracked
                if state.direct.get(&id) == Some(&row) {
                    direct.insert(id, kept_ids.len());
                }
                kept_ids.push(id);
                kept_data.extend_from_slice(&state.data[row * self.dim..(row + 1) * self.dim]);
            }
        }

        let removed = state.ids.len() - kept_ids.len();
        state.ids = kept_ids;
        state.data = kept_data;
        state.direct = direct;
        Ok(removed)
    }

    fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchMatches> {
        if queries.dim != self.dim {
            return Err(Error::Search {
                operation: "search".to_string(),
                cause: format!(
                    "query dimension {} does not match index dimension {}",
                    queries.dim, self.dim
                ),
            });
        }

        let state = self.state.read().map_err(|_| Self::poisoned("search"))?;

        let mut distances = Vec::with_capacity(queries.rows * k);
        let mut ids = Vec::with_capacity(queries.rows * k);

        for q in 0..queries.rows {
            let query = queries.row(q);
            let mut scored: Vec<(f32, i64)> = state
                .ids
                .iter()
                .enumerate()
                .map(|(row, &id)| {
                    let vector = &state.data[row * self.dim..(row + 1) * self.dim];
                    (Self::l2_squared(query, vector), id)
                })
                .collect();

            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            let found = scored.len();
            for (distance, id) in scored {
                distances.push(distance);
                ids.push(id);
            }
            // Pad short rows so every row is exactly k wide
            for _ in found..k {
                distances.push(f32::INFINITY);
                ids.push(-1);
            }
        }

        Ok(SearchMatches { distances, ids })
    }

    fn reconstruct(&self, id: i64) -> Result<Option<Vec<f32>>> {
        let state = self
            .state
            .read()
            .map_err(|_| Self::poisoned("reconstruct"))?;

        // Served from the id map; rows carried over from a snapshot are
        // not in it and report "not found"
        Ok(state
            .direct
            .get(&id)
            .map(|&row| state.data[row * self.dim..(row + 1) * self.dim].to_vec()))
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.state.read().map_err(|_| Self::poisoned("save_to"))?;
            FlatSnapshot {
                dim: self.dim,
                ids: state.ids.clone(),
                data: state.data.clone(),
            }
        };

        let bytes = bincode::serialize(&snapshot).map_err(|e| Error::Storage {
            operation: "encode_index_snapshot".to_string(),
            cause: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage {
                operation: "create_index_dir".to_string(),
                cause: e.to_string(),
            })?;
        }

        fs::write(path, bytes).map_err(|e| Error::Storage {
            operation: "write_index_snapshot".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(vectors: &[&[f32]], dim: usize) -> VectorBatch {
        let mut data = Vec::new();
        for v in vectors {
            data.extend_from_slice(v);
        }
        VectorBatch::new(data, vectors.len(), dim).expect("valid batch")
    }

    #[test]
    fn test_new_index_is_empty() {
        let index = FlatIndex::new(4);
        assert_eq!(index.dimension(), 4);
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_add_and_count() {
        let index = FlatIndex::new(2);
        let batch = batch_of(&[&[0.0, 1.0], &[1.0, 0.0]], 2);
        index.add_with_ids(&batch, &[0, 1]).unwrap();
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_add_dimension_mismatch() {
        let index = FlatIndex::new(4);
        let batch = batch_of(&[&[0.0, 1.0]], 2);
        let result = index.add_with_ids(&batch, &[0]);
        assert!(result.is_err());
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_add_id_count_mismatch() {
        let index = FlatIndex::new(2);
        let batch = batch_of(&[&[0.0, 1.0], &[1.0, 0.0]], 2);
        let result = index.add_with_ids(&batch, &[0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_ids_stack() {
        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.0, 1.0]], 2), &[7])
            .unwrap();
        index
            .add_with_ids(&batch_of(&[&[1.0, 0.0]], 2), &[7])
            .unwrap();
        assert_eq!(index.count().unwrap(), 2);

        // Reconstruct returns the newest occurrence
        let vector = index.reconstruct(7).unwrap().unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
    }

    #[test]
    fn test_remove_all_occurrences() {
        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.0, 1.0], &[1.0, 0.0]], 2), &[3, 3])
            .unwrap();
        index
            .add_with_ids(&batch_of(&[&[0.5, 0.5]], 2), &[4])
            .unwrap();

        let removed = index.remove_ids(&[3]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.count().unwrap(), 1);
        assert!(index.reconstruct(3).unwrap().is_none());
        assert!(index.reconstruct(4).unwrap().is_some());
    }

    #[test]
    fn test_remove_absent_id_is_zero() {
        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.0, 1.0]], 2), &[0])
            .unwrap();
        assert_eq!(index.remove_ids(&[99]).unwrap(), 0);
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = FlatIndex::new(2);
        let batch = batch_of(&[&[0.0, 0.0], &[1.0, 0.0], &[3.0, 0.0]], 2);
        index.add_with_ids(&batch, &[10, 11, 12]).unwrap();

        let query = batch_of(&[&[0.9, 0.0]], 2);
        let hits = index.search(&query, 2).unwrap();

        assert_eq!(hits.ids, vec![11, 10]);
        assert!((hits.distances[0] - 0.01).abs() < 1e-6);
        assert!((hits.distances[1] - 0.81).abs() < 1e-6);
    }

    #[test]
    fn test_search_pads_short_rows() {
        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.0, 0.0]], 2), &[0])
            .unwrap();

        let query = batch_of(&[&[0.0, 0.0]], 2);
        let hits = index.search(&query, 3).unwrap();

        assert_eq!(hits.ids, vec![0, -1, -1]);
        assert_eq!(hits.distances[0], 0.0);
        assert!(hits.distances[1].is_infinite());
        assert!(hits.distances[2].is_infinite());
    }

    #[test]
    fn test_search_empty_index() {
        let index = FlatIndex::new(2);
        let query = batch_of(&[&[0.0, 0.0]], 2);
        let hits = index.search(&query, 2).unwrap();
        assert_eq!(hits.ids, vec![-1, -1]);
    }

    #[test]
    fn test_search_multiple_queries() {
        let index = FlatIndex::new(2);
        let batch = batch_of(&[&[0.0, 0.0], &[10.0, 10.0]], 2);
        index.add_with_ids(&batch, &[0, 1]).unwrap();

        let queries = batch_of(&[&[0.1, 0.1], &[9.9, 9.9]], 2);
        let hits = index.search(&queries, 1).unwrap();
        assert_eq!(hits.ids, vec![0, 1]);
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let index = FlatIndex::new(4);
        let query = batch_of(&[&[0.0, 0.0]], 2);
        assert!(index.search(&query, 1).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.25, 0.75], &[0.5, 0.5]], 2), &[0, 1])
            .unwrap();
        index.save_to(&path).unwrap();

        let loaded = FlatIndex::load_from(&path).unwrap();
        assert_eq!(loaded.dimension(), 2);
        assert_eq!(loaded.count().unwrap(), 2);

        // Searches see the persisted rows
        let hits = loaded.search(&batch_of(&[&[0.25, 0.75]], 2), 1).unwrap();
        assert_eq!(hits.ids, vec![0]);
        assert_eq!(hits.distances[0], 0.0);

        // Reconstruction does not: the id map is not persisted
        assert!(loaded.reconstruct(0).unwrap().is_none());
    }

    #[test]
    fn test_loaded_index_reconstructs_only_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let index = FlatIndex::new(2);
        index
            .add_with_ids(&batch_of(&[&[0.25, 0.75]], 2), &[0])
            .unwrap();
        index.save_to(&path).unwrap();

        let loaded = FlatIndex::load_from(&path).unwrap();
        loaded
            .add_with_ids(&batch_of(&[&[0.9, 0.1]], 2), &[1])
            .unwrap();

        assert!(loaded.reconstruct(0).unwrap().is_none());
        assert_eq!(loaded.reconstruct(1).unwrap().unwrap(), vec![0.9, 0.1]);
    }

    #[test]
    fn test_remove_shifts_id_map_positions() {
        let index = FlatIndex::new(2);
        index
            .add_with_ids(
                &batch_of(&[&[0.0, 0.0], &[1.0, 1.0], &[2.0, 2.0]], 2),
                &[0, 1, 2],
            )
            .unwrap();

        index.remove_ids(&[0]).unwrap();

        // Rows shifted down by one; reconstruction must follow them
        assert_eq!(index.reconstruct(1).unwrap().unwrap(), vec![1.0, 1.0]);
        assert_eq!(index.reconstruct(2).unwrap().unwrap(), vec![2.0, 2.0]);
        assert!(index.reconstruct(0).unwrap().is_none());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = FlatIndex::load_from(&dir.path().join("absent.idx"));
        assert!(result.is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("vectors.idx");
        let index = FlatIndex::new(2);
        index.save_to(&path).unwrap();
        assert!(path.exists());
    }
}
