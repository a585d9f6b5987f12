//! Write-ahead log.
//!
//! Append-only JSONL journal of every structural mutation. One JSON
//! object per line; files live under the engine's `logs/` directory and
//! rotate to a new timestamped file once the current one crosses the
//! configured byte threshold. Whole files are only ever deleted by
//! [`WalService::cleanup`].
//!
//! The log is written *after* the index mutation commits, while the
//! mutation lock is still held, so entries appear in mutation order. It
//! is an operation journal rather than a pre-image WAL: replay feeds the
//! recorded operations back through the engine's public mutators.

use crate::index::VectorBatch;
use crate::{Error, Result, current_timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Operations recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOperation {
    /// A batch of vectors was appended.
    AddVectors,
    /// A set of ids was removed.
    DeleteVectors,
    /// The index was replaced with an empty one.
    ClearIndex,
}

/// One appended log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Unix seconds at append time.
    pub timestamp: f64,
    /// What was done.
    pub operation: WalOperation,
    /// Operation payload; self-sufficient for replay.
    pub data: serde_json::Value,
}

/// Payload of an [`WalOperation::AddVectors`] entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddPayload {
    /// Full vector rows, one array per vector.
    pub vectors: Vec<Vec<f32>>,
    /// Ids assigned when the batch was originally applied.
    pub ids: Vec<u64>,
}

/// Payload of a [`WalOperation::DeleteVectors`] entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletePayload {
    /// Engine-level ids requested for deletion.
    pub ids: Vec<u64>,
}

/// Append-only, rotating write-ahead log.
///
/// Appends are serialized through a dedicated async mutex so two writers
/// can never interleave partial lines; the same mutex guards rotation.
pub struct WalService {
    log_dir: PathBuf,
    max_wal_bytes: u64,
    current: Mutex<Option<PathBuf>>,
}

impl WalService {
    /// Opens (creating if needed) the log directory and resumes appending
    /// to the newest existing log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(log_dir: impl Into<PathBuf>, max_wal_bytes: u64) -> Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir).map_err(|e| Error::Storage {
            operation: "create_wal_dir".to_string(),
            cause: e.to_string(),
        })?;

        let current = newest_log_file(&log_dir);
        Ok(Self {
            log_dir,
            max_wal_bytes,
            current: Mutex::new(current),
        })
    }

    /// Appends one entry as a JSON line, rotating first if the current
    /// file has crossed the size threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or the append
    /// fails. Callers on the mutation path swallow and count this error
    /// rather than rolling back the committed index change.
    pub async fn log_operation(
        &self,
        operation: WalOperation,
        data: serde_json::Value,
    ) -> Result<()> {
        let entry = WalEntry {
            timestamp: current_timestamp(),
            operation,
            data,
        };
        let mut line = serde_json::to_string(&entry).map_err(|e| Error::Storage {
            operation: "encode_wal_entry".to_string(),
            cause: e.to_string(),
        })?;
        line.push('\n');

        let mut current = self.current.lock().await;
        let path = self.select_file(&mut current).await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Storage {
                operation: "open_wal_file".to_string(),
                cause: format!("{}: {}", path.display(), e),
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Storage {
                operation: "append_wal".to_string(),
                cause: e.to_string(),
            })?;
        file.flush().await.map_err(|e| Error::Storage {
            operation: "append_wal".to_string(),
            cause: e.to_string(),
        })
    }

    /// Logs an applied add batch with its assigned ids.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the append fails.
    pub async fn log_add(&self, batch: &VectorBatch, ids: &[u64]) -> Result<()> {
        let payload = AddPayload {
            vectors: (0..batch.rows).map(|r| batch.row(r).to_vec()).collect(),
            ids: ids.to_vec(),
        };
        let data = serde_json::to_value(payload).map_err(|e| Error::Storage {
            operation: "encode_wal_entry".to_string(),
            cause: e.to_string(),
        })?;
        self.log_operation(WalOperation::AddVectors, data).await
    }

    /// Logs an applied deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the append fails.
    pub async fn log_delete(&self, ids: &[u64]) -> Result<()> {
        let data = serde_json::to_value(DeletePayload { ids: ids.to_vec() }).map_err(|e| {
            Error::Storage {
                operation: "encode_wal_entry".to_string(),
                cause: e.to_string(),
            }
        })?;
        self.log_operation(WalOperation::DeleteVectors, data).await
    }

    /// Logs an index clear.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    pub async fn log_clear(&self) -> Result<()> {
        self.log_operation(WalOperation::ClearIndex, serde_json::json!({}))
            .await
    }

    /// Reads every entry from every log file in creation order.
    ///
    /// Unreadable files and malformed lines are logged and skipped; they
    /// never abort the read.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log directory itself cannot be
    /// enumerated.
    #[instrument(skip(self))]
    pub async fn read_entries(&self) -> Result<Vec<WalEntry>> {
        let mut files = self.log_files().await?;
        files.sort();

        let mut entries = Vec::new();
        for path in files {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable WAL file");
                    continue;
                },
            };
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping malformed WAL line");
                    },
                }
            }
        }

        debug!(entries = entries.len(), "read WAL entries");
        Ok(entries)
    }

    /// Deletes log files older than the retention window.
    ///
    /// Age is judged by file modification time. Returns how many files
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be enumerated.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let retention_secs = u64::try_from(retention_days.max(0)).unwrap_or(0) * 86_400;
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(retention_secs));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let mut removed = 0usize;
        for path in self.log_files().await? {
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping WAL file without mtime");
                    continue;
                },
            };
            if modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(file = %path.display(), "removed expired WAL file");
                        removed += 1;
                    },
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "failed to remove WAL file");
                    },
                }
            }
        }

        // Forget the current file if cleanup deleted it
        let mut current = self.current.lock().await;
        if let Some(path) = current.as_ref() {
            if !path.exists() {
                *current = None;
            }
        }

        Ok(removed)
    }

    /// Lists WAL files currently in the log directory, unordered.
    async fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut dir = match tokio::fs::read_dir(&self.log_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage {
                    operation: "read_wal_dir".to_string(),
                    cause: e.to_string(),
                });
            },
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| Error::Storage {
            operation: "read_wal_dir".to_string(),
            cause: e.to_string(),
        })? {
            let path = entry.path();
            if is_wal_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Picks the file the next append goes to, rotating when the current
    /// one has crossed the size threshold. The append mutex is held.
    async fn select_file(&self, current: &mut Option<PathBuf>) -> PathBuf {
        if let Some(path) = current.as_ref() {
            let crossed = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len() >= self.max_wal_bytes,
                // Not created yet; the first append will create it
                Err(_) => false,
            };
            if !crossed {
                return path.clone();
            }
        }

        let name = format!("wal_{}.log", Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        let path = self.log_dir.join(name);
        debug!(file = %path.display(), "starting new WAL file");
        *current = Some(path.clone());
        path
    }
}

/// Returns true for paths shaped like `wal_<timestamp>.log`.
fn is_wal_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("wal_") && n.ends_with(".log"))
}

/// Newest log file by name; timestamped names sort lexicographically.
fn newest_log_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| is_wal_file(p))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> VectorBatch {
        VectorBatch::new(vec![0.1, 0.2, 0.3, 0.4], 2, 2).expect("valid batch")
    }

    #[test]
    fn test_operation_serializes_snake_case() {
        let json = serde_json::to_string(&WalOperation::AddVectors).unwrap();
        assert_eq!(json, "\"add_vectors\"");
        let json = serde_json::to_string(&WalOperation::DeleteVectors).unwrap();
        assert_eq!(json, "\"delete_vectors\"");
        let json = serde_json::to_string(&WalOperation::ClearIndex).unwrap();
        assert_eq!(json, "\"clear_index\"");
    }

    #[tokio::test]
    async fn test_log_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalService::new(dir.path(), 10 * 1024 * 1024).unwrap();

        wal.log_add(&sample_batch(), &[0, 1]).await.unwrap();
        wal.log_delete(&[0]).await.unwrap();
        wal.log_clear().await.unwrap();

        let entries = wal.read_entries().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].operation, WalOperation::AddVectors);
        assert_eq!(entries[1].operation, WalOperation::DeleteVectors);
        assert_eq!(entries[2].operation, WalOperation::ClearIndex);

        let add: AddPayload = serde_json::from_value(entries[0].data.clone()).unwrap();
        assert_eq!(add.vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        assert_eq!(add.ids, vec![0, 1]);

        let delete: DeletePayload = serde_json::from_value(entries[1].data.clone()).unwrap();
        assert_eq!(delete.ids, vec![0]);

        assert!(entries[0].timestamp > 0.0);
    }

    #[tokio::test]
    async fn test_rotation_by_size() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny threshold so every append after the first rotates
        let wal = WalService::new(dir.path(), 32).unwrap();

        for _ in 0..4 {
            wal.log_clear().await.unwrap();
            // Rotation names files by millisecond timestamp; keep appends
            // in distinct milliseconds so each rotation gets a fresh name
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let files = wal.log_files().await.unwrap();
        assert!(
            files.len() >= 2,
            "expected rotation to produce multiple files, got {}",
            files.len()
        );

        // All entries remain readable across files, in order
        let entries = wal.read_entries().await.unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalService::new(dir.path(), 10 * 1024 * 1024).unwrap();

        wal.log_clear().await.unwrap();

        // Corrupt the file with a non-JSON line plus a blank
        let files = wal.log_files().await.unwrap();
        let path = files.first().unwrap();
        let mut contents = std::fs::read_to_string(path).unwrap();
        contents.push_str("this is not json\n\n");
        std::fs::write(path, contents).unwrap();

        wal.log_delete(&[7]).await.unwrap();

        let entries = wal.read_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, WalOperation::ClearIndex);
        assert_eq!(entries[1].operation, WalOperation::DeleteVectors);
    }

    #[tokio::test]
    async fn test_read_entries_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalService::new(dir.path(), 1024).unwrap();
        let entries = wal.read_entries().await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_resumes_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = WalService::new(dir.path(), 10 * 1024 * 1024).unwrap();
            wal.log_clear().await.unwrap();
        }

        // A new service over the same directory appends to the same file
        let wal = WalService::new(dir.path(), 10 * 1024 * 1024).unwrap();
        wal.log_clear().await.unwrap();

        let files = wal.log_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(wal.read_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalService::new(dir.path(), 10 * 1024 * 1024).unwrap();
        wal.log_clear().await.unwrap();

        // Fresh files survive a 7-day window
        assert_eq!(wal.cleanup(7).await.unwrap(), 0);
        assert_eq!(wal.log_files().await.unwrap().len(), 1);

        // A zero-day window removes everything written before "now"
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(wal.cleanup(0).await.unwrap(), 1);
        assert!(wal.log_files().await.unwrap().is_empty());

        // Appending afterwards starts a fresh file
        wal.log_clear().await.unwrap();
        assert_eq!(wal.log_files().await.unwrap().len(), 1);
    }
}
