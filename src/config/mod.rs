//! Configuration management.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default embedding dimensionality (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSION: usize = 384;

/// Default number of mutating batches between automatic saves.
pub const DEFAULT_AUTO_SAVE_INTERVAL: u64 = 100;

/// Default WAL rotation threshold in bytes (10 MB).
pub const DEFAULT_MAX_WAL_BYTES: u64 = 10 * 1024 * 1024;

/// Default WAL retention window in days.
pub const DEFAULT_WAL_RETENTION_DAYS: i64 = 7;

/// Name of the persisted index file inside the data directory.
const INDEX_FILENAME: &str = "vectors.idx";

/// Name of the WAL subdirectory inside the data directory.
const WAL_DIRNAME: &str = "logs";

/// Main configuration for the vector index engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the index file and the WAL subdirectory.
    pub data_dir: PathBuf,
    /// Fixed vector dimensionality, immutable for the engine's lifetime.
    pub dimension: usize,
    /// Number of mutating batches between automatic background saves.
    pub auto_save_interval: u64,
    /// Byte threshold after which the current WAL file is rotated.
    pub max_wal_bytes: u64,
    /// Age in days beyond which WAL files are eligible for cleanup.
    pub wal_retention_days: i64,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Vector dimensionality.
    pub dimension: Option<usize>,
    /// Batches between automatic saves.
    pub auto_save_interval: Option<u64>,
    /// WAL rotation threshold in bytes.
    pub max_wal_bytes: Option<u64>,
    /// WAL retention window in days.
    pub wal_retention_days: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".vecdex"),
            dimension: DEFAULT_DIMENSION,
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            max_wal_bytes: DEFAULT_MAX_WAL_BYTES,
            wal_retention_days: DEFAULT_WAL_RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::Storage {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| crate::Error::InvalidInput(format!(
                "config file {}: {e}",
                path.display()
            )))?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/vecdex/` on macOS)
    /// 2. XDG config dir (`~/.config/vecdex/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default().with_env_overrides();
        };

        // Check platform-specific config dir first
        let platform_config = base_dirs.config_dir().join("vecdex").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config.with_env_overrides();
            }
        }

        // Fall back to XDG-style ~/.config/vecdex/ for Unix compatibility
        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("vecdex")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config.with_env_overrides();
            }
        }

        Self::default().with_env_overrides()
    }

    /// Converts a `ConfigFile` to an `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(dimension) = file.dimension {
            config.dimension = dimension;
        }
        if let Some(interval) = file.auto_save_interval {
            config.auto_save_interval = interval;
        }
        if let Some(bytes) = file.max_wal_bytes {
            config.max_wal_bytes = bytes;
        }
        if let Some(days) = file.wal_retention_days {
            config.wal_retention_days = days;
        }

        config
    }

    /// Applies `VECDEX_DATA_DIR` over the configured data directory.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("VECDEX_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the vector dimensionality.
    #[must_use]
    pub const fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Sets the auto-save interval in mutating batches.
    #[must_use]
    pub const fn with_auto_save_interval(mut self, batches: u64) -> Self {
        self.auto_save_interval = batches;
        self
    }

    /// Sets the WAL rotation threshold in bytes.
    #[must_use]
    pub const fn with_max_wal_bytes(mut self, bytes: u64) -> Self {
        self.max_wal_bytes = bytes;
        self
    }

    /// Sets the WAL retention window in days.
    #[must_use]
    pub const fn with_wal_retention_days(mut self, days: i64) -> Self {
        self.wal_retention_days = days;
        self
    }

    /// Path of the persisted index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILENAME)
    }

    /// Path of the WAL directory.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(WAL_DIRNAME)
    }
}
