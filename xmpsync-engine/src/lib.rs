//! xmpsync engine: scan two sidecar trees, diff their edit histories, and
//! apply per-file decisions with backups.
//!
//! Most callers want [`ReconcileSession`]. The lower-level pieces are public
//! for front ends that drive their own pipeline.

pub mod backup;
pub mod diff;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod matcher;
pub mod pool;
pub mod scan;
pub mod session;

use std::path::Path;

pub use backup::{backup_path_for, BackupManager};
pub use diff::{diff_histories, raw_diff, DiffSummary};
pub use error::{EngineError, SyncError};
pub use executor::{ExecuteOptions, ExecutionReport, FileOutcome, FileReport, ReportCounts};
pub use pool::{CancelToken, WorkerPool};
pub use scan::ScanResult;
pub use session::{ReconcileSession, RescanSummary};

use xmpsync_core::EngineConfig;

/// One-shot scan with default settings.
pub fn scan(archive_root: &Path, session_root: &Path) -> Result<ScanResult, EngineError> {
    scan_with(archive_root, session_root, &EngineConfig::default())
}

/// One-shot scan with explicit settings and a private pool.
pub fn scan_with(
    archive_root: &Path,
    session_root: &Path,
    config: &EngineConfig,
) -> Result<ScanResult, EngineError> {
    let pool = WorkerPool::from_config(config)?;
    scan::scan_trees(archive_root, session_root, config, &pool, &CancelToken::new())
}
