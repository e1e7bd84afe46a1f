//! Configuration for the warden daemon.
//!
//! Loads settings from /etc/warden/config.toml or falls back to defaults.
//! Every field has a serde default so a partial file stays valid.

use crate::patterns::PatternOverlay;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/warden/config.toml";

/// Storage layout: ledger, backup store and artifact store live under one
/// data directory, each independently durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("warden")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger").join("changes.jsonl")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("rollback")
    }
}

/// Execution supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// A command still running after this long is marked
    /// ExecutionFailed/unknown; it is never assumed to have succeeded.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Captured stdout/stderr cap per stream
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_output_cap() -> usize {
    64 * 1024
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            output_cap_bytes: default_output_cap(),
        }
    }
}

/// Backup retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backups older than this are eligible for the audited retention
    /// sweep. They are never deleted any other way.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    90
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// OS restore-point backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePointConfig {
    /// "timeshift", "snapper", "command", or "none"
    #[serde(default = "default_rp_method")]
    pub method: String,

    /// Shell command used when method = "command"; must print an
    /// identifier on stdout
    #[serde(default)]
    pub command: Option<String>,
}

fn default_rp_method() -> String {
    "timeshift".to_string()
}

impl Default for RestorePointConfig {
    fn default() -> Self {
        Self {
            method: default_rp_method(),
            command: None,
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub backups: BackupConfig,

    #[serde(default)]
    pub restore_point: RestorePointConfig,

    #[serde(default)]
    pub patterns: PatternOverlay,
}

impl WardenConfig {
    /// Load from the given path, falling back to defaults when the file is
    /// missing or malformed. A malformed file is reported, not fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<WardenConfig>(&content) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    Ok(config)
                }
                Err(e) => {
                    warn!("Config at {} is invalid ({}), using defaults", path.display(), e);
                    Ok(Self::default())
                }
            },
            Err(e) => {
                warn!("Could not read {} ({}), using defaults", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(CONFIG_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.execution.timeout_secs, 120);
        assert_eq!(config.backups.retention_days, 90);
        assert_eq!(config.restore_point.method, "timeshift");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[execution]\ntimeout_secs = 5").unwrap();

        let config = WardenConfig::load(file.path()).unwrap();
        assert_eq!(config.execution.timeout_secs, 5);
        // Untouched sections keep defaults
        assert_eq!(config.backups.retention_days, 90);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = WardenConfig::load(Path::new("/nonexistent/warden.toml")).unwrap();
        assert_eq!(config.execution.timeout_secs, 120);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [valid toml").unwrap();

        let config = WardenConfig::load(file.path()).unwrap();
        assert_eq!(config.execution.timeout_secs, 120);
    }

    #[test]
    fn test_storage_paths() {
        let config = WardenConfig::default();
        assert!(config.storage.ledger_path().ends_with("ledger/changes.jsonl"));
        assert!(config.storage.backup_dir().ends_with("backups"));
        assert!(config.storage.artifact_dir().ends_with("rollback"));
    }

    #[test]
    fn test_pattern_overlay_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[patterns]\nextra_protected = [\"/srv/data\"]\nextra_read_only = [\"zpool\"]"
        )
        .unwrap();

        let config = WardenConfig::load(file.path()).unwrap();
        assert_eq!(config.patterns.extra_protected, vec!["/srv/data"]);
        assert_eq!(config.patterns.extra_read_only, vec!["zpool"]);
    }
}
