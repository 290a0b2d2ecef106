//! Error types for xmpsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use xmpsync_core::{ConfigError, DecisionError};

/// Errors that stop a whole call. Per-file problems never surface here; they
/// are collected into scan warnings or execution reports.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Roots or engine settings are unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Nothing to reconcile: no sidecar exists under both roots.
    #[error(
        "no matching sidecars under both roots ({archive_only} archive-only, {session_only} session-only)"
    )]
    NoMatchedFiles {
        archive_only: usize,
        session_only: usize,
    },

    /// The relative path is not part of the current scan.
    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// The worker pool could not be built.
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// An I/O error outside any per-file operation, with annotated path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why one file's sync operation failed (or would fail in a dry run).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("destination directory does not exist: {path}")]
    DestinationDirMissing { path: PathBuf },

    #[error("destination is read-only: {path}")]
    ReadOnly { path: PathBuf },

    #[error("source and destination are the same file: {path}")]
    SameFile { path: PathBuf },

    /// The backup slot holds a file this tool did not write. Needs explicit
    /// confirmation (`overwrite_foreign_backups`) before it is replaced.
    #[error("backup slot {path} holds an unrelated file; refusing to overwrite")]
    BackupCollision { path: PathBuf },

    /// The batch was cancelled before this file started.
    #[error("cancelled before start")]
    Cancelled,
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
