//! Vector index engine.
//!
//! The [`VectorEngine`] facade ties the similarity index primitive to the
//! write-ahead log, the lock domains, metrics, and snapshot persistence.
//! All public operations are async; clones are cheap handles onto the
//! same shared engine.
//!
//! # Operation / Lock Domain Map
//!
//! | Operation | Domain(s) held |
//! |-----------|----------------|
//! | `add_vectors`, `delete_vectors`, `clear_index`, `restore_from_backup` | mutation |
//! | `search_vectors`, `reconstruct_vector`, `save_index`, `load_index` | direct access |
//! | `create_backup` (copy phase only) | mutation + snapshot |
//!
//! Search deliberately does not contend with structural mutations; the
//! index's interior lock keeps that interleave memory-safe.

mod backup;
pub mod locks;
mod metrics;
pub mod validate;

pub use locks::LockCoordinator;
pub use metrics::{EngineMetrics, MetricsSnapshot};

use crate::config::EngineConfig;
use crate::index::{IndexFactory, SimilarityIndex};
use crate::wal::{AddPayload, DeletePayload, WalOperation, WalService};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

type ShadowTable = HashMap<u64, Vec<f32>>;

/// Durable vector index engine.
///
/// Owns one similarity index, its WAL, and its snapshot file under a
/// single data directory. One engine instance per storage path.
///
/// # Example
///
/// ```rust,ignore
/// use vecdex::{EngineConfig, VectorEngine};
///
/// let config = EngineConfig::new()
///     .with_data_dir("/var/lib/vecdex")
///     .with_dimension(384);
/// let engine = VectorEngine::open(config).await?;
///
/// let ids = engine.add_vectors(vec![vec![0.1; 384]]).await?;
/// let results = engine.search_vectors(vec![vec![0.1; 384]], 5).await?;
/// engine.close().await?;
/// ```
#[derive(Clone)]
pub struct VectorEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    /// The live index. The outer lock only guards wholesale replacement;
    /// row-level synchronization lives inside the index itself.
    index: RwLock<Box<dyn SimilarityIndex>>,
    /// Mirror of vectors added through this instance, for reconstruction.
    /// Not rebuilt from snapshots or backups.
    shadow: RwLock<ShadowTable>,
    wal: WalService,
    locks: LockCoordinator,
    metrics: EngineMetrics,
    ops_since_save: AtomicU64,
    /// Latest detached save task, so its outcome stays observable.
    save_task: Mutex<Option<JoinHandle<()>>>,
}

impl VectorEngine {
    /// Opens an engine over the configured data directory.
    ///
    /// Loads the persisted index snapshot if one exists, otherwise starts
    /// with an empty index. WAL replay is a separate, explicit step; see
    /// [`VectorEngine::replay_wal`].
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created, or an
    /// existing snapshot cannot be read or does not match the configured
    /// dimensionality.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| Error::Storage {
            operation: "create_data_dir".to_string(),
            cause: e.to_string(),
        })?;

        let index_path = config.index_path();
        let index = if index_path.exists() {
            IndexFactory::load(&index_path, config.dimension)?
        } else {
            IndexFactory::empty(config.dimension)
        };
        let count = index.count()?;

        let wal = WalService::new(config.wal_dir(), config.max_wal_bytes)?;

        let metrics = EngineMetrics::new();
        metrics.set_total_vectors(count as u64);

        info!(
            data_dir = %config.data_dir.display(),
            dimension = config.dimension,
            vectors = count,
            "vector engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                index: RwLock::new(index),
                shadow: RwLock::new(HashMap::new()),
                wal,
                locks: LockCoordinator::new(),
                metrics,
                ops_since_save: AtomicU64::new(0),
                save_task: Mutex::new(None),
            }),
        })
    }

    /// The engine's fixed vector dimensionality.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.config.dimension
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of vectors currently in the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index state is inaccessible.
    pub fn count(&self) -> Result<usize> {
        self.index_read()?.count()
    }

    /// Validates and appends a batch of vectors.
    ///
    /// Ids are assigned contiguously from the index count at the moment
    /// of the add: `[count, count + n)`. After deletions the count
    /// shrinks, so an id can be reissued; callers that need stable
    /// external keys must map them on top.
    ///
    /// An empty batch is a no-op that returns no ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorSize`] if any vector does not match the
    /// engine dimensionality (the index is untouched), or
    /// [`Error::Index`] if the append itself fails.
    #[instrument(skip(self, vectors), fields(rows = vectors.len()))]
    pub async fn add_vectors(&self, vectors: Vec<Vec<f32>>) -> Result<Vec<u64>> {
        let start = Instant::now();
        let batch =
            validate::validate_vectors(&vectors, self.inner.config.dimension, "add_vectors")?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.inner.locks.mutation().await;

        let (ids, new_count) = {
            let index = self.index_read()?;
            let count = index.count()?;
            let base = u64::try_from(count).map_err(|_| Error::Index {
                operation: "add_vectors".to_string(),
                cause: "id space exhausted".to_string(),
            })?;
            let ids: Vec<u64> = (0..batch.rows as u64).map(|i| base + i).collect();
            let ids_index: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
            index.add_with_ids(&batch, &ids_index)?;
            (ids, count + batch.rows)
        };

        {
            let mut shadow = self.shadow_write()?;
            for (row, &id) in ids.iter().enumerate() {
                shadow.insert(id, batch.row(row).to_vec());
            }
        }

        // Append-after-commit: the index change stands even if the log
        // write fails
        if let Err(e) = self.inner.wal.log_add(&batch, &ids).await {
            warn!(error = %e, "WAL append failed after add");
            self.inner.metrics.record_wal_append_failure();
        }

        drop(guard);

        self.inner.metrics.record_add(batch.rows as u64, start.elapsed());
        self.inner.metrics.set_total_vectors(new_count as u64);
        self.maybe_auto_save();

        Ok(ids)
    }

    /// Removes vectors by id.
    ///
    /// Ids at or beyond the current count are silently dropped from the
    /// request and counted in the metrics; the call still succeeds and
    /// returns how many vectors were actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the removal itself fails.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn delete_vectors(&self, ids: Vec<u64>) -> Result<u32> {
        let start = Instant::now();
        let guard = self.inner.locks.mutation().await;

        let (removed, in_range, out_of_range, new_count) = {
            let index = self.index_read()?;
            let count = index.count()? as u64;

            let (in_range, dropped): (Vec<u64>, Vec<u64>) =
                ids.into_iter().partition(|&id| id < count);
            if !dropped.is_empty() {
                debug!(dropped = dropped.len(), "ignoring out-of-range delete ids");
            }

            let ids_index: Vec<i64> = in_range.iter().map(|&id| id as i64).collect();
            let removed = index.remove_ids(&ids_index)?;
            let new_count = index.count()?;
            (removed, in_range, dropped.len() as u64, new_count)
        };

        if !in_range.is_empty() {
            {
                let mut shadow = self.shadow_write()?;
                for id in &in_range {
                    shadow.remove(id);
                }
            }
            if let Err(e) = self.inner.wal.log_delete(&in_range).await {
                warn!(error = %e, "WAL append failed after delete");
                self.inner.metrics.record_wal_append_failure();
            }
        }

        drop(guard);

        self.inner
            .metrics
            .record_delete(removed as u64, out_of_range, start.elapsed());
        self.inner.metrics.set_total_vectors(new_count as u64);
        if !in_range.is_empty() {
            self.maybe_auto_save();
        }

        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    /// Batched k-nearest-neighbor search.
    ///
    /// Returns one `(distances, ids)` pair per query, each exactly `k`
    /// wide; rows with fewer than `k` neighbors are padded with
    /// `f32::INFINITY` / `-1`. Results reflect some recent index state:
    /// a search overlapping a mutation may see it or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] when `k` is zero, or
    /// [`Error::VectorSize`] when a query does not match the engine
    /// dimensionality.
    #[instrument(skip(self, queries), fields(queries = queries.len(), k = k))]
    pub async fn search_vectors(
        &self,
        queries: Vec<Vec<f32>>,
        k: usize,
    ) -> Result<Vec<(Vec<f32>, Vec<i64>)>> {
        if k == 0 {
            return Err(Error::Search {
                operation: "search_vectors".to_string(),
                cause: "k must be greater than zero".to_string(),
            });
        }

        let start = Instant::now();
        let batch =
            validate::validate_vectors(&queries, self.inner.config.dimension, "search_vectors")?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let matches = {
            let _guard = self.inner.locks.direct_access().await;
            let index = self.index_read()?;
            index.search(&batch, k)?
        };

        let results = (0..batch.rows)
            .map(|q| {
                (
                    matches.distances[q * k..(q + 1) * k].to_vec(),
                    matches.ids[q * k..(q + 1) * k].to_vec(),
                )
            })
            .collect();

        self.inner
            .metrics
            .record_search(batch.rows as u64, start.elapsed());

        Ok(results)
    }

    /// Returns the stored vector for an id, if any.
    ///
    /// Falls back from the index's own reconstruction to the in-memory
    /// shadow table; the shadow only covers vectors added through this
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the index state is inaccessible.
    pub async fn reconstruct_vector(&self, id: u64) -> Result<Option<Vec<f32>>> {
        let _guard = self.inner.locks.direct_access().await;

        let native = {
            let index = self.index_read()?;
            index.reconstruct(id as i64)?
        };
        if native.is_some() {
            return Ok(native);
        }

        Ok(self.shadow_read()?.get(&id).cloned())
    }

    /// Writes the index snapshot to `path`, or to the configured index
    /// path when `None`.
    ///
    /// Holds the direct-access domain for the whole write: searches and
    /// loads wait until the file is complete on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the snapshot cannot be written.
    #[instrument(skip(self, path))]
    pub async fn save_index(&self, path: Option<&Path>) -> Result<()> {
        let _guard = self.inner.locks.direct_access().await;
        let target = path.map_or_else(|| self.inner.config.index_path(), Path::to_path_buf);

        {
            let index = self.index_read()?;
            index.save_to(&target)?;
        }

        self.inner.metrics.record_save();
        debug!(path = %target.display(), "index saved");
        Ok(())
    }

    /// Replaces the live index with a snapshot from `path`, or from the
    /// configured index path when `None`.
    ///
    /// The shadow table keeps its old entries: it mirrors adds through
    /// this instance, not the loaded snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the snapshot cannot be read, or
    /// [`Error::InvalidInput`] on a dimensionality mismatch.
    #[instrument(skip(self, path))]
    pub async fn load_index(&self, path: Option<&Path>) -> Result<()> {
        let _guard = self.inner.locks.direct_access().await;
        let target = path.map_or_else(|| self.inner.config.index_path(), Path::to_path_buf);

        let loaded = IndexFactory::load(&target, self.inner.config.dimension)?;
        let count = loaded.count()?;
        {
            let mut slot = self.index_write()?;
            *slot = loaded;
        }

        self.inner.metrics.set_total_vectors(count as u64);
        info!(path = %target.display(), vectors = count, "index loaded");
        Ok(())
    }

    /// Replaces the live index with a fresh empty one and forces a save.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the forced save fails.
    #[instrument(skip(self))]
    pub async fn clear_index(&self) -> Result<()> {
        let _guard = self.inner.locks.mutation().await;

        {
            let mut slot = self.index_write()?;
            *slot = IndexFactory::empty(self.inner.config.dimension);
        }
        self.shadow_write()?.clear();

        if let Err(e) = self.inner.wal.log_clear().await {
            warn!(error = %e, "WAL append failed after clear");
            self.inner.metrics.record_wal_append_failure();
        }

        self.inner.metrics.set_total_vectors(0);
        self.inner.ops_since_save.store(0, Ordering::Relaxed);
        self.save_index(None).await?;

        info!("index cleared");
        Ok(())
    }

    /// Replays the full WAL history through the public mutators.
    ///
    /// Replay is explicit and unconditional: every entry in every log
    /// file is applied in recorded order, regardless of what the loaded
    /// snapshot already contains. Running it on an engine whose snapshot
    /// already covers the log therefore applies those operations twice;
    /// replay into a freshly created engine reproduces the logged state.
    /// Replayed operations pass through the normal mutation path and are
    /// re-logged to this engine's own WAL.
    ///
    /// Returns the number of successfully applied operations; entries
    /// that fail to parse or apply are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] only if the log directory cannot be
    /// enumerated.
    #[instrument(skip(self))]
    pub async fn replay_wal(&self) -> Result<u64> {
        let entries = self.inner.wal.read_entries().await?;
        let total = entries.len();
        let mut replayed = 0u64;

        for entry in entries {
            let outcome = match entry.operation {
                WalOperation::AddVectors => {
                    match serde_json::from_value::<AddPayload>(entry.data) {
                        Ok(payload) => self.add_vectors(payload.vectors).await.map(|_| ()),
                        Err(e) => {
                            warn!(error = %e, "skipping add entry with malformed payload");
                            continue;
                        },
                    }
                },
                WalOperation::DeleteVectors => {
                    match serde_json::from_value::<DeletePayload>(entry.data) {
                        Ok(payload) => self.delete_vectors(payload.ids).await.map(|_| ()),
                        Err(e) => {
                            warn!(error = %e, "skipping delete entry with malformed payload");
                            continue;
                        },
                    }
                },
                WalOperation::ClearIndex => self.clear_index().await,
            };

            match outcome {
                Ok(()) => replayed += 1,
                Err(e) => warn!(error = %e, "replayed operation failed; skipping"),
            }
        }

        info!(replayed, total, "WAL replay finished");
        Ok(replayed)
    }

    /// Deletes WAL files older than the retention window.
    ///
    /// Uses the configured retention when `retention_days` is `None`.
    /// Returns how many files were removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the log directory cannot be
    /// enumerated.
    pub async fn cleanup_wal(&self, retention_days: Option<i64>) -> Result<usize> {
        let days = retention_days.unwrap_or(self.inner.config.wal_retention_days);
        let removed = self.inner.wal.cleanup(days).await?;
        if removed > 0 {
            info!(removed, days, "WAL cleanup finished");
        }
        Ok(removed)
    }

    /// Takes a lock-free snapshot of the engine counters.
    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Waits for any pending background save, then forces a final save.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the final save fails.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let pending = self
            .inner
            .save_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "pending auto-save task did not finish cleanly");
            }
        }

        self.save_index(None).await?;
        info!("vector engine closed");
        Ok(())
    }

    /// Bumps the mutation counter and spawns a detached save at the
    /// configured interval. The newest task's handle is kept so `close`
    /// can wait for it; an interval of zero disables auto-save.
    fn maybe_auto_save(&self) {
        let interval = self.inner.config.auto_save_interval;
        if interval == 0 {
            return;
        }

        let ops = self.inner.ops_since_save.fetch_add(1, Ordering::Relaxed) + 1;
        if ops < interval {
            return;
        }
        self.inner.ops_since_save.store(0, Ordering::Relaxed);

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            match engine.save_index(None).await {
                Ok(()) => {
                    engine.inner.metrics.record_auto_save();
                    debug!("auto-save completed");
                },
                Err(e) => warn!(error = %e, "auto-save failed"),
            }
        });

        if let Ok(mut slot) = self.inner.save_task.lock() {
            *slot = Some(handle);
        }
    }

    fn index_read(&self) -> Result<RwLockReadGuard<'_, Box<dyn SimilarityIndex>>> {
        self.inner.index.read().map_err(|_| Error::Index {
            operation: "index_access".to_string(),
            cause: "engine index lock poisoned".to_string(),
        })
    }

    fn index_write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn SimilarityIndex>>> {
        self.inner.index.write().map_err(|_| Error::Index {
            operation: "index_access".to_string(),
            cause: "engine index lock poisoned".to_string(),
        })
    }

    fn shadow_read(&self) -> Result<RwLockReadGuard<'_, ShadowTable>> {
        self.inner.shadow.read().map_err(|_| Error::Index {
            operation: "shadow_access".to_string(),
            cause: "shadow table lock poisoned".to_string(),
        })
    }

    fn shadow_write(&self) -> Result<RwLockWriteGuard<'_, ShadowTable>> {
        self.inner.shadow.write().map_err(|_| Error::Index {
            operation: "shadow_access".to_string(),
            cause: "shadow table lock poisoned".to_string(),
        })
    }
}
