//! Turn decisions into file copies.
//!
//! ## Per-file protocol
//!
//! 1. Check: source readable, destination directory present and writable,
//!    source and destination distinct, backup slot usable.
//! 2. Read the source bytes.
//! 3. Stage a backup of the current destination (temporary name).
//! 4. Write the source bytes to `.<name>.xmpsync.tmp` beside the destination.
//! 5. Commit the backup (rename into its slot, previous backup set aside).
//! 6. Rename the temporary onto the destination, then drop the set-aside
//!    backup.
//!
//! A failure at any step removes the temporaries, and a failure at step 6
//! puts the previous backup back. The destination is only ever replaced by
//! the final rename, so it holds either its original content or the full
//! source content. A dry run stops after step 1.
//!
//! Files are processed on the worker pool; one file's failure never stops the
//! others. Operations on the same destination are serialized.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use xmpsync_core::{Decision, DecisionSnapshot, MatchedFile, SyncOperation};

use crate::backup::BackupManager;
use crate::error::{io_err, SyncError};
use crate::pool::{CancelToken, WorkerPool};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    pub backups_enabled: bool,
    pub overwrite_foreign_backups: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backups_enabled: true,
            overwrite_foreign_backups: false,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Decision was no-action or keep-both.
    Skipped,
    Succeeded { backup: Option<PathBuf> },
    /// Dry run: every check passed.
    WouldSucceed,
    Failed { reason: String },
    /// Dry run: a check failed.
    WouldFail { reason: String },
    /// Cancelled before this file started.
    Abandoned,
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. } | FileOutcome::WouldFail { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub relative_path: PathBuf,
    pub decision: Decision,
    pub operation: Option<SyncOperation>,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Outcome of one execution batch, in scan order.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileReport>,
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for file in &self.files {
            match file.outcome {
                FileOutcome::Skipped => counts.skipped += 1,
                FileOutcome::Succeeded { .. } | FileOutcome::WouldSucceed => counts.succeeded += 1,
                FileOutcome::Failed { .. } | FileOutcome::WouldFail { .. } => counts.failed += 1,
                FileOutcome::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    pub fn operations(&self) -> impl Iterator<Item = &SyncOperation> {
        self.files.iter().filter_map(|f| f.operation.as_ref())
    }

    pub fn file(&self, relative_path: &Path) -> Option<&FileReport> {
        self.files.iter().find(|f| f.relative_path == relative_path)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The copy a decision implies, or `None` for no-action and keep-both.
pub fn plan_operation(
    file: &MatchedFile,
    decision: Decision,
    backups: &BackupManager,
) -> Option<SyncOperation> {
    let (source, destination) = match decision {
        Decision::KeepArchive => (&file.archive_path, &file.session_path),
        Decision::KeepSession => (&file.session_path, &file.archive_path),
        Decision::NoAction | Decision::KeepBoth => return None,
    };
    Some(SyncOperation {
        source_path: source.clone(),
        destination_path: destination.clone(),
        backup_path: backups.planned_path(destination),
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

type DestinationLocks = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Apply `snapshot` to `files`. Never fails as a whole; per-file failures
/// are recorded in the report.
pub fn execute(
    files: &[MatchedFile],
    snapshot: &DecisionSnapshot,
    options: &ExecuteOptions,
    pool: &WorkerPool,
    cancel: &CancelToken,
) -> ExecutionReport {
    let started_at = Utc::now();
    let backups = BackupManager::new(options.backups_enabled, options.overwrite_foreign_backups);

    let planned: Vec<(PathBuf, Decision, Option<SyncOperation>)> = files
        .iter()
        .map(|file| {
            let decision = snapshot.get(&file.relative_path);
            let op = plan_operation(file, decision, &backups);
            (file.relative_path.clone(), decision, op)
        })
        .collect();

    let locks = DestinationLocks::new();
    let outcomes = pool.map_ordered(&planned, cancel, |(relative, _, op)| match op {
        None => FileOutcome::Skipped,
        Some(op) => run_operation(relative, op, &backups, options.dry_run, &locks),
    });

    let mut cancelled = false;
    let files = planned
        .into_iter()
        .zip(outcomes)
        .map(|((relative_path, decision, operation), outcome)| {
            let outcome = match outcome {
                Some(outcome) => outcome,
                None if operation.is_none() => FileOutcome::Skipped,
                None => {
                    cancelled = true;
                    FileOutcome::Abandoned
                }
            };
            FileReport {
                relative_path,
                decision,
                operation,
                outcome,
            }
        })
        .collect();

    ExecutionReport {
        dry_run: options.dry_run,
        started_at,
        finished_at: Utc::now(),
        files,
        cancelled: cancelled || cancel.is_cancelled(),
    }
}

fn run_operation(
    relative: &Path,
    op: &SyncOperation,
    backups: &BackupManager,
    dry_run: bool,
    locks: &DestinationLocks,
) -> FileOutcome {
    let lock = locks
        .entry(op.destination_path.clone())
        .or_default()
        .clone();
    // Poisoning cannot leave the destination half-written.
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    match apply(op, backups, dry_run) {
        Ok(_) if dry_run => {
            tracing::info!(
                "[dry-run] would copy {} -> {}",
                op.source_path.display(),
                op.destination_path.display()
            );
            FileOutcome::WouldSucceed
        }
        Ok(backup) => {
            tracing::info!(
                "copied {} -> {}",
                op.source_path.display(),
                op.destination_path.display()
            );
            FileOutcome::Succeeded { backup }
        }
        Err(err) => {
            tracing::warn!("{}: {err}", relative.display());
            let reason = err.to_string();
            if dry_run {
                FileOutcome::WouldFail { reason }
            } else {
                FileOutcome::Failed { reason }
            }
        }
    }
}

/// Run the protocol for one operation. Returns the committed backup path.
fn apply(
    op: &SyncOperation,
    backups: &BackupManager,
    dry_run: bool,
) -> Result<Option<PathBuf>, SyncError> {
    let source = &op.source_path;
    let destination = &op.destination_path;

    check(op, backups)?;
    if dry_run {
        return Ok(op.backup_path.clone());
    }

    let content = std::fs::read(source).map_err(|e| io_err(source, e))?;

    let staged = match &op.backup_path {
        Some(backup) if destination.is_file() => Some(backups.stage(destination, backup)?),
        _ => None,
    };

    let tmp = dest_tmp_path(destination);
    if let Err(e) = std::fs::write(&tmp, &content) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&tmp, e));
    }

    let committed = match staged.map(|s| s.commit()).transpose() {
        Ok(committed) => committed,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&tmp, destination) {
        let _ = std::fs::remove_file(&tmp);
        if let Some(committed) = committed {
            committed.roll_back();
        }
        return Err(io_err(destination, e));
    }

    Ok(committed.map(|c| c.keep()))
}

/// Pre-flight checks shared by dry and real runs. No mutation.
fn check(op: &SyncOperation, backups: &BackupManager) -> Result<(), SyncError> {
    let source = &op.source_path;
    let destination = &op.destination_path;

    match std::fs::metadata(source) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(SyncError::SourceMissing {
                path: source.clone(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::SourceMissing {
                path: source.clone(),
            })
        }
        Err(e) => return Err(io_err(source, e)),
    }
    std::fs::File::open(source).map_err(|e| io_err(source, e))?;

    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => {
            if meta.permissions().readonly() {
                return Err(SyncError::ReadOnly {
                    path: parent.to_path_buf(),
                });
            }
        }
        _ => {
            return Err(SyncError::DestinationDirMissing {
                path: parent.to_path_buf(),
            })
        }
    }

    if let Ok(meta) = std::fs::metadata(destination) {
        if meta.permissions().readonly() {
            return Err(SyncError::ReadOnly {
                path: destination.clone(),
            });
        }
        let same = match (source.canonicalize(), destination.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            return Err(SyncError::SameFile {
                path: destination.clone(),
            });
        }
    }

    if let Some(backup) = &op.backup_path {
        backups.check_slot(backup)?;
    }
    Ok(())
}

/// `.<name>.xmpsync.tmp` beside `destination`.
fn dest_tmp_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.xmpsync.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpsync_core::{History, PairFingerprint};

    use crate::backup::backup_path_for;
    use tempfile::TempDir;

    const V1: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" note="archive"/></rdf:RDF></x:xmpmeta>"#;
    const V2: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" note="session"/></rdf:RDF></x:xmpmeta>"#;

    struct Fixture {
        _tmp: TempDir,
        archive: PathBuf,
        session: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("archive");
        let session = tmp.path().join("session");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::create_dir_all(&session).unwrap();
        Fixture {
            _tmp: tmp,
            archive,
            session,
        }
    }

    fn matched(fx: &Fixture, rel: &str) -> MatchedFile {
        let a = fx.archive.join(rel);
        let s = fx.session.join(rel);
        std::fs::write(&a, V1).unwrap();
        std::fs::write(&s, V2).unwrap();
        MatchedFile {
            relative_path: PathBuf::from(rel),
            archive_path: a,
            session_path: s,
            archive_history: History::new(),
            session_history: History::new(),
            diff: Some(Vec::new()),
            fingerprint: PairFingerprint {
                archive: String::new(),
                session: String::new(),
            },
            byte_identical: false,
            metadata_differs: true,
            session_unedited: false,
            warnings: Vec::new(),
        }
    }

    fn snapshot(pairs: &[(&str, Decision)]) -> DecisionSnapshot {
        pairs
            .iter()
            .map(|(p, d)| (PathBuf::from(p), *d))
            .collect()
    }

    fn run(files: &[MatchedFile], snap: &DecisionSnapshot, options: ExecuteOptions) -> ExecutionReport {
        let pool = WorkerPool::new(2).unwrap();
        execute(files, snap, &options, &pool, &CancelToken::new())
    }

    #[test]
    fn keep_archive_copies_and_backs_up() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        let report = run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepArchive)]),
            ExecuteOptions::default(),
        );

        let backup = backup_path_for(&fx.session.join("a.xmp"));
        assert_eq!(
            report.files[0].outcome,
            FileOutcome::Succeeded {
                backup: Some(backup.clone())
            }
        );
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V1);
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), V2);
        assert_eq!(std::fs::read_to_string(fx.archive.join("a.xmp")).unwrap(), V1);
    }

    #[test]
    fn keep_session_backs_up_archive_content() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepSession)]),
            ExecuteOptions::default(),
        );
        let backup = backup_path_for(&fx.archive.join("a.xmp"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), V1);
        assert_eq!(std::fs::read_to_string(fx.archive.join("a.xmp")).unwrap(), V2);
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
    }

    #[test]
    fn keep_both_and_no_action_are_skipped() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp"), matched(&fx, "b.xmp")];
        let report = run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepBoth)]),
            ExecuteOptions::default(),
        );
        assert!(report.files.iter().all(|f| f.outcome == FileOutcome::Skipped));
        assert_eq!(report.operations().count(), 0);
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
    }

    #[test]
    fn dry_run_plans_same_operations_without_mutation() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp"), matched(&fx, "b.xmp")];
        let snap = snapshot(&[
            ("a.xmp", Decision::KeepSession),
            ("b.xmp", Decision::KeepArchive),
        ]);

        let dry = run(
            &files,
            &snap,
            ExecuteOptions {
                dry_run: true,
                ..ExecuteOptions::default()
            },
        );
        assert!(dry.files.iter().all(|f| f.outcome == FileOutcome::WouldSucceed));
        assert_eq!(std::fs::read_to_string(fx.archive.join("a.xmp")).unwrap(), V1);
        assert!(!backup_path_for(&fx.archive.join("a.xmp")).exists());

        let real = run(&files, &snap, ExecuteOptions::default());
        let dry_ops: Vec<_> = dry.operations().cloned().collect();
        let real_ops: Vec<_> = real.operations().cloned().collect();
        assert_eq!(dry_ops, real_ops);
        assert_eq!(real.counts().succeeded, 2);
    }

    #[test]
    fn partial_failure_leaves_other_files_done() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp"), matched(&fx, "b.xmp")];
        std::fs::remove_file(fx.archive.join("a.xmp")).unwrap();

        let report = run(
            &files,
            &snapshot(&[
                ("a.xmp", Decision::KeepArchive),
                ("b.xmp", Decision::KeepArchive),
            ]),
            ExecuteOptions::default(),
        );
        assert!(matches!(report.files[0].outcome, FileOutcome::Failed { .. }));
        assert!(matches!(report.files[1].outcome, FileOutcome::Succeeded { .. }));
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
        assert_eq!(std::fs::read_to_string(fx.session.join("b.xmp")).unwrap(), V1);
        assert_eq!(
            report.counts(),
            ReportCounts {
                skipped: 0,
                succeeded: 1,
                failed: 1,
                abandoned: 0
            }
        );
    }

    #[test]
    fn backups_disabled_writes_no_backup() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        let report = run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepSession)]),
            ExecuteOptions {
                backups_enabled: false,
                ..ExecuteOptions::default()
            },
        );
        assert_eq!(report.files[0].outcome, FileOutcome::Succeeded { backup: None });
        assert!(!backup_path_for(&fx.archive.join("a.xmp")).exists());
        assert_eq!(std::fs::read_to_string(fx.archive.join("a.xmp")).unwrap(), V2);
    }

    #[test]
    fn foreign_backup_slot_blocks_copy() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        let slot = backup_path_for(&fx.session.join("a.xmp"));
        std::fs::write(&slot, b"not a sidecar").unwrap();

        let report = run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepArchive)]),
            ExecuteOptions::default(),
        );
        assert!(report.files[0].outcome.is_failure());
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
        assert_eq!(std::fs::read(&slot).unwrap(), b"not a sidecar");
    }

    #[test]
    fn second_run_replaces_previous_backup() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        let snap = snapshot(&[("a.xmp", Decision::KeepArchive)]);
        run(&files, &snap, ExecuteOptions::default());
        std::fs::write(fx.session.join("a.xmp"), V2).unwrap();
        let report = run(&files, &snap, ExecuteOptions::default());
        assert!(matches!(report.files[0].outcome, FileOutcome::Succeeded { .. }));
        let backup = backup_path_for(&fx.session.join("a.xmp"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), V2);
    }

    #[test]
    fn cancelled_batch_abandons_pending_files() {
        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        let cancel = CancelToken::new();
        cancel.cancel();
        let pool = WorkerPool::new(1).unwrap();
        let report = execute(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepArchive)]),
            &ExecuteOptions::default(),
            &pool,
            &cancel,
        );
        assert!(report.cancelled);
        assert_eq!(report.files[0].outcome, FileOutcome::Abandoned);
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_destination_dir_fails_cleanly() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let files = vec![matched(&fx, "a.xmp")];
        std::fs::set_permissions(&fx.session, std::fs::Permissions::from_mode(0o555)).unwrap();

        let report = run(
            &files,
            &snapshot(&[("a.xmp", Decision::KeepArchive)]),
            ExecuteOptions::default(),
        );

        std::fs::set_permissions(&fx.session, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(report.files[0].outcome, FileOutcome::Failed { .. }));
        assert_eq!(std::fs::read_to_string(fx.session.join("a.xmp")).unwrap(), V2);
        let leftovers: Vec<_> = std::fs::read_dir(&fx.session)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "no temporaries left: {leftovers:?}");
    }
}
