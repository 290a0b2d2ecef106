//! Engine configuration.
//!
//! The engine owns no settings storage; callers hand it an [`EngineConfig`].
//! For callers that do want a file, this module reads and writes YAML at
//! `<config_dir>/xmpsync/config.yaml`.
//!
//! # API pattern
//!
//! - `fn_at(path: &Path, …)`: explicit file; used in tests with `TempDir`
//! - `fn(…)`: derives the path from `dirs::config_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Suffix appended to backup file names. Backups are also dot-prefixed.
pub const BACKUP_SUFFIX: &str = ".xmpsync.bak";

/// Volatile per-step fields that never count as a parameter difference.
pub const DEFAULT_IGNORED_PARAMETERS: &[&str] = &["modversion", "blendop_version"];

/// Runtime knobs for scanning and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size; `None` uses the number of available cores.
    pub workers: Option<usize>,
    pub backups_enabled: bool,
    /// Sidecar file extension, without the dot. Matched case-insensitively.
    pub sidecar_extension: String,
    pub ignored_parameters: Vec<String>,
    /// Overwrite an existing backup slot even when it does not look like a
    /// sidecar written by a previous run.
    pub overwrite_foreign_backups: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            backups_enabled: true,
            sidecar_extension: "xmp".to_string(),
            ignored_parameters: DEFAULT_IGNORED_PARAMETERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            overwrite_foreign_backups: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.sidecar_extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        Ok(())
    }

    /// Resolved pool size.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Whether `path` carries the sidecar extension.
    pub fn is_sidecar(&self, path: &Path) -> bool {
        let wanted = self.sidecar_extension.trim_start_matches('.');
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    }
}

/// Settings a front end remembers between runs. The engine only ever sees the
/// `engine` part, as plain values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub archive_root: Option<PathBuf>,
    pub session_root: Option<PathBuf>,
    pub engine: EngineConfig,
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<config_dir>/xmpsync/config.yaml`. Pure, no I/O.
pub fn settings_path_in(config_dir: &Path) -> PathBuf {
    config_dir.join("xmpsync").join("config.yaml")
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load_at(path: &Path) -> Result<SettingsFile, ConfigError> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let settings: SettingsFile =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
    settings.engine.validate()?;
    Ok(settings)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SettingsFile, ConfigError> {
    load_at(&settings_path()?)
}

/// Atomically save settings to `path` (`.tmp` sibling, then rename).
pub fn save_at(path: &Path, settings: &SettingsFile) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    let yaml = serde_yaml::to_string(settings)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| ConfigError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(settings: &SettingsFile) -> Result<(), ConfigError> {
    save_at(&settings_path()?, settings)
}

/// Default settings location.
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| settings_path_in(&dir))
        .ok_or(ConfigError::ConfigDirNotFound)
}
