//! Non-blocking backup and restore.
//!
//! A backup clones the index through a staging snapshot while holding
//! the mutation and snapshot domains, then releases both before the
//! (potentially slow) write to the backup target. Searches are never
//! blocked; mutations are only blocked for the clone itself.

use super::VectorEngine;
use crate::index::IndexFactory;
use crate::{Error, Result};
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument, warn};

impl VectorEngine {
    /// Writes a consistent copy of the index to `path`.
    ///
    /// The copy is taken under the mutation and snapshot domains, always
    /// in that order, so no structural change or competing save can
    /// interleave with it. The write to `path` happens after both are
    /// released, on a blocking worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the staging snapshot or the backup
    /// file cannot be written.
    #[instrument(skip(self, path))]
    pub async fn create_backup(&self, path: &Path) -> Result<()> {
        let start = Instant::now();
        let target = path.to_path_buf();
        let staging = self.inner.config.index_path().with_extension("staging");

        let copy = {
            let _mutation = self.inner.locks.mutation().await;
            let _snapshot = self.inner.locks.snapshot().await;

            {
                let index = self.index_read()?;
                index.save_to(&staging)?;
            }
            let copy = IndexFactory::load(&staging, self.inner.config.dimension)?;

            if let Err(e) = std::fs::remove_file(&staging) {
                warn!(file = %staging.display(), error = %e, "failed to remove staging snapshot");
            }

            copy
        };

        let vectors = copy.count()?;
        tokio::task::spawn_blocking(move || copy.save_to(&target))
            .await
            .map_err(|e| Error::Storage {
                operation: "create_backup".to_string(),
                cause: e.to_string(),
            })??;

        self.inner.metrics.record_backup(start.elapsed());
        info!(path = %path.display(), vectors, "backup created");
        Ok(())
    }

    /// Replaces the live index with the contents of a backup file.
    ///
    /// The shadow table is cleared: restored vectors did not pass
    /// through this instance's add path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backup file is missing or
    /// unreadable, or [`Error::InvalidInput`] on a dimensionality
    /// mismatch.
    #[instrument(skip(self, path))]
    pub async fn restore_from_backup(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::Storage {
                operation: "restore_from_backup".to_string(),
                cause: format!("backup file not found: {}", path.display()),
            });
        }

        let _guard = self.inner.locks.mutation().await;

        let loaded = IndexFactory::load(path, self.inner.config.dimension)?;
        let count = loaded.count()?;
        {
            let mut slot = self.index_write()?;
            *slot = loaded;
        }
        self.shadow_write()?.clear();

        self.inner.metrics.set_total_vectors(count as u64);
        info!(path = %path.display(), vectors = count, "index restored from backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::{Error, VectorEngine};
    use tempfile::TempDir;

    async fn test_engine(dim: usize) -> (VectorEngine, TempDir) {
        let dir = TempDir::new().expect("tempdir failed");
        let config = EngineConfig::new()
            .with_data_dir(dir.path())
            .with_dimension(dim)
            .with_auto_save_interval(0);
        let engine = VectorEngine::open(config).await.expect("open failed");
        (engine, dir)
    }

    #[tokio::test]
    async fn test_backup_and_restore_round_trip() {
        let (engine, dir) = test_engine(2).await;
        engine
            .add_vectors(vec![vec![0.0, 1.0], vec![1.0, 0.0]])
            .await
            .unwrap();

        let backup_path = dir.path().join("backup.idx");
        engine.create_backup(&backup_path).await.unwrap();
        assert!(backup_path.exists());

        engine.clear_index().await.unwrap();
        assert_eq!(engine.count().unwrap(), 0);

        engine.restore_from_backup(&backup_path).await.unwrap();
        assert_eq!(engine.count().unwrap(), 2);

        let results = engine
            .search_vectors(vec![vec![0.0, 0.9]], 1)
            .await
            .unwrap();
        assert_eq!(results[0].1, vec![0]);
    }

    #[tokio::test]
    async fn test_backup_removes_staging_file() {
        let (engine, dir) = test_engine(2).await;
        engine.add_vectors(vec![vec![0.5, 0.5]]).await.unwrap();

        let backup_path = dir.path().join("backup.idx");
        engine.create_backup(&backup_path).await.unwrap();

        let staging = engine.config().index_path().with_extension("staging");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_backup_records_metrics() {
        let (engine, dir) = test_engine(2).await;
        engine.add_vectors(vec![vec![0.5, 0.5]]).await.unwrap();

        engine
            .create_backup(&dir.path().join("backup.idx"))
            .await
            .unwrap();

        let metrics = engine.get_metrics();
        assert_eq!(metrics.backup_count, 1);
        assert!(metrics.last_backup_timestamp > 0.0);
    }

    #[tokio::test]
    async fn test_restore_missing_file_errors() {
        let (engine, dir) = test_engine(2).await;
        let result = engine
            .restore_from_backup(&dir.path().join("nope.idx"))
            .await;
        assert!(matches!(result, Err(Error::Storage { .. })));
    }

    #[tokio::test]
    async fn test_restore_rejects_dimension_mismatch() {
        let (engine_a, dir_a) = test_engine(2).await;
        engine_a.add_vectors(vec![vec![0.5, 0.5]]).await.unwrap();
        let backup_path = dir_a.path().join("backup.idx");
        engine_a.create_backup(&backup_path).await.unwrap();

        let (engine_b, _dir_b) = test_engine(3).await;
        let result = engine_b.restore_from_backup(&backup_path).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
