//! Backups of overwritten sidecars.
//!
//! Before a destination is replaced its current content is kept at
//! `.<name>.xmpsync.bak` in the same directory. Only the most recent backup
//! per destination is retained. A slot that already holds something this tool
//! did not write (not a regular file, or not a sidecar) is a collision and is
//! left alone unless foreign backups may be overwritten.

use std::path::{Path, PathBuf};

use xmpsync_core::{EngineConfig, BACKUP_SUFFIX};
use xmpsync_history::looks_like_sidecar;

use crate::error::{io_err, SyncError};

/// Backup path for `destination`: dot-prefixed sibling with [`BACKUP_SUFFIX`].
pub fn backup_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}{BACKUP_SUFFIX}"))
}

/// Whether `path` is named like a backup this tool writes.
pub fn is_backup_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(BACKUP_SUFFIX))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupManager {
    enabled: bool,
    overwrite_foreign: bool,
}

impl BackupManager {
    pub fn new(enabled: bool, overwrite_foreign: bool) -> Self {
        Self {
            enabled,
            overwrite_foreign,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.backups_enabled, config.overwrite_foreign_backups)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Backup slot for a planned overwrite of `destination`, if one will be
    /// written. No I/O beyond an existence probe.
    pub fn planned_path(&self, destination: &Path) -> Option<PathBuf> {
        (self.enabled && destination.is_file()).then(|| backup_path_for(destination))
    }

    /// Verify the slot can be (re)written without destroying unrelated data.
    pub fn check_slot(&self, backup: &Path) -> Result<(), SyncError> {
        let meta = match std::fs::symlink_metadata(backup) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(backup, e)),
        };

        let collision = || SyncError::BackupCollision {
            path: backup.to_path_buf(),
        };

        if meta.is_dir() {
            return Err(collision());
        }
        if self.overwrite_foreign {
            return Ok(());
        }
        if !meta.file_type().is_file() {
            return Err(collision());
        }
        let existing = std::fs::read(backup).map_err(|e| io_err(backup, e))?;
        if looks_like_sidecar(&existing) {
            Ok(())
        } else {
            Err(collision())
        }
    }

    /// Copy the current `destination` to a temporary file next to `backup`.
    /// Nothing is visible at the backup path until [`StagedBackup::commit`].
    pub fn stage(&self, destination: &Path, backup: &Path) -> Result<StagedBackup, SyncError> {
        let tmp = tmp_sibling(backup);
        std::fs::copy(destination, &tmp).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            io_err(destination, e)
        })?;
        Ok(StagedBackup {
            tmp,
            backup: backup.to_path_buf(),
            committed: false,
        })
    }
}

/// A backup written to its temporary name. Dropped without commit, the
/// temporary is removed.
#[derive(Debug)]
pub struct StagedBackup {
    tmp: PathBuf,
    backup: PathBuf,
    committed: bool,
}

impl StagedBackup {
    /// Move the staged copy into its slot. Whatever the slot held before is
    /// set aside until the overwrite it protects has landed.
    pub fn commit(mut self) -> Result<CommittedBackup, SyncError> {
        let previous = match std::fs::symlink_metadata(&self.backup) {
            Ok(_) => {
                let aside = sibling_with_suffix(&self.backup, ".prev");
                std::fs::rename(&self.backup, &aside).map_err(|e| io_err(&self.backup, e))?;
                Some(aside)
            }
            Err(_) => None,
        };

        if let Err(e) = std::fs::rename(&self.tmp, &self.backup) {
            if let Some(aside) = &previous {
                let _ = std::fs::rename(aside, &self.backup);
            }
            return Err(io_err(&self.backup, e));
        }

        self.committed = true;
        Ok(CommittedBackup {
            backup: self.backup.clone(),
            previous,
            settled: false,
        })
    }
}

impl Drop for StagedBackup {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// A backup in its slot whose destination has not been replaced yet.
/// Dropped without [`keep`](Self::keep), the slot goes back to what it held
/// before the commit.
#[derive(Debug)]
pub struct CommittedBackup {
    backup: PathBuf,
    previous: Option<PathBuf>,
    settled: bool,
}

impl CommittedBackup {
    /// The destination was replaced: discard the superseded backup.
    pub fn keep(mut self) -> PathBuf {
        if let Some(aside) = &self.previous {
            let _ = std::fs::remove_file(aside);
        }
        self.settled = true;
        self.backup.clone()
    }

    /// The destination was not replaced: restore the slot.
    pub fn roll_back(mut self) {
        self.restore();
        self.settled = true;
    }

    fn restore(&self) {
        match &self.previous {
            Some(aside) => {
                if let Err(e) = std::fs::rename(aside, &self.backup) {
                    tracing::warn!("cannot restore {}: {e}", self.backup.display());
                }
            }
            None => {
                let _ = std::fs::remove_file(&self.backup);
            }
        }
    }
}

impl Drop for CommittedBackup {
    fn drop(&mut self) {
        if !self.settled {
            self.restore();
        }
    }
}

/// `<path>.tmp` in the same directory.
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
