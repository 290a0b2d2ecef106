//! A reconciliation session: one scan plus the decisions made against it.
//!
//! The session owns the worker pool, the latest [`ScanResult`] and the
//! [`DecisionStore`]. Execution works from a snapshot of the store, so
//! decisions edited while a batch runs only affect the next batch.
//!
//! The cancellation token stops the batch that is running, or the next one
//! to start if none is. The flag clears when that batch ends, so one cancel
//! never disables the session.

use std::path::{Path, PathBuf};

use serde::Serialize;

use xmpsync_core::ports::{infer_image_path, ExternalEditor, PreviewRenderer, PreviewRequest, PreviewStatus};
use xmpsync_core::{
    Decision, DecisionCounts, DecisionError, DecisionSnapshot, DecisionStore, EngineConfig,
    MatchedFile, ScanWarning, Side, StepDiffEntry, SyncOperation,
};

use crate::backup::BackupManager;
use crate::diff::{diff_histories, raw_diff};
use crate::error::EngineError;
use crate::executor::{self, plan_operation, ExecuteOptions, ExecutionReport};
use crate::matcher::clean_relative;
use crate::pool::{CancelToken, WorkerPool};
use crate::scan::{scan_trees, ScanResult};

/// What changed between two scans of the same roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanSummary {
    /// Files whose content changed and whose decision was discarded.
    pub invalidated: Vec<PathBuf>,
    /// Newly matched files.
    pub added: Vec<PathBuf>,
    /// Files no longer matched; their decisions are dropped.
    pub removed: Vec<PathBuf>,
    /// The rescan was cancelled. The previous scan and every decision are
    /// kept as they were.
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct ReconcileSession {
    config: EngineConfig,
    pool: WorkerPool,
    cancel: CancelToken,
    scan: ScanResult,
    decisions: DecisionStore,
}

impl ReconcileSession {
    /// Validate the roots, scan both trees, and start with every file at
    /// no-action.
    pub fn open(
        archive_root: &Path,
        session_root: &Path,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        Self::open_with_cancel(archive_root, session_root, config, CancelToken::new())
    }

    /// Like [`open`](Self::open) with a caller-held cancellation token.
    pub fn open_with_cancel(
        archive_root: &Path,
        session_root: &Path,
        config: EngineConfig,
        cancel: CancelToken,
    ) -> Result<Self, EngineError> {
        let pool = WorkerPool::from_config(&config)?;
        let scan = scan_trees(archive_root, session_root, &config, &pool, &cancel);
        cancel.reset();
        let scan = scan?;

        let mut decisions = DecisionStore::new();
        for file in &scan.matched {
            decisions.register(&file.relative_path, file.has_differences().unwrap_or(false));
        }

        Ok(Self {
            config,
            pool,
            cancel,
            scan,
            decisions,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn scan_result(&self) -> &ScanResult {
        &self.scan
    }

    pub fn matched(&self) -> &[MatchedFile] {
        &self.scan.matched
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.scan.warnings
    }

    pub fn file(&self, relative_path: &Path) -> Result<&MatchedFile, EngineError> {
        self.scan
            .file(relative_path)
            .ok_or_else(|| unknown(relative_path))
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Record a decision. Returns the previous one.
    pub fn set_decision(
        &mut self,
        relative_path: &Path,
        decision: Decision,
    ) -> Result<Decision, EngineError> {
        let previous = self.decisions.set(&clean_relative(relative_path), decision)?;
        tracing::debug!("{}: {previous} -> {decision}", relative_path.display());
        Ok(previous)
    }

    pub fn get_decision(&self, relative_path: &Path) -> Result<Decision, EngineError> {
        Ok(self.decisions.get(&clean_relative(relative_path))?)
    }

    /// Apply one decision to every file, or only to files with differences.
    pub fn set_all(&mut self, decision: Decision, only_with_differences: bool) -> usize {
        self.decisions.set_all(decision, only_with_differences)
    }

    pub fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    pub fn decision_counts(&self) -> DecisionCounts {
        self.decisions.counts()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Step-level diff of one file.
    pub fn diff(&self, relative_path: &Path) -> Result<Vec<StepDiffEntry>, EngineError> {
        let file = self.file(relative_path)?;
        Ok(match &file.diff {
            Some(diff) => diff.clone(),
            None => diff_histories(&file.archive_history, &file.session_history),
        })
    }

    /// Unified text diff of the two documents as they are on disk now.
    pub fn raw_diff(&self, relative_path: &Path) -> Result<String, EngineError> {
        let file = self.file(relative_path)?;
        let archive = read_text(&file.archive_path)?;
        let session = read_text(&file.session_path)?;
        Ok(raw_diff(
            &archive,
            &session,
            &crate::matcher::relative_key(&file.relative_path),
        ))
    }

    /// Ask the renderer for a preview of one side of a file.
    pub fn preview(
        &self,
        relative_path: &Path,
        side: Side,
        renderer: &dyn PreviewRenderer,
        max_dimension: u32,
    ) -> Result<PreviewStatus, EngineError> {
        let file = self.file(relative_path)?;
        let sidecar_path = file.path_for(side).clone();
        let request = PreviewRequest {
            side,
            image_path: infer_image_path(&sidecar_path),
            sidecar_path,
            max_dimension,
        };
        Ok(renderer.request_preview(&request))
    }

    /// Hand both versions to an external editor. A returned decision is
    /// recorded; `None` leaves the current decision untouched.
    pub fn resolve_with_editor(
        &mut self,
        relative_path: &Path,
        editor: &mut dyn ExternalEditor,
    ) -> Result<Option<Decision>, EngineError> {
        let (archive, session) = {
            let file = self.file(relative_path)?;
            (file.archive_path.clone(), file.session_path.clone())
        };
        let outcome = editor.reconcile(&archive, &session);
        if let Some(decision) = outcome {
            self.set_decision(relative_path, decision)?;
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Operations the current decisions would perform, in scan order.
    pub fn plan(&self, backups_enabled: bool) -> Vec<(PathBuf, SyncOperation)> {
        let backups = BackupManager::new(backups_enabled, self.config.overwrite_foreign_backups);
        let snapshot = self.decisions.snapshot();
        self.scan
            .matched
            .iter()
            .filter_map(|f| {
                plan_operation(f, snapshot.get(&f.relative_path), &backups)
                    .map(|op| (f.relative_path.clone(), op))
            })
            .collect()
    }

    /// Execute the current decisions.
    pub fn execute(&self, dry_run: bool, backups_enabled: bool) -> ExecutionReport {
        let options = ExecuteOptions {
            dry_run,
            backups_enabled,
            overwrite_foreign_backups: self.config.overwrite_foreign_backups,
        };
        self.execute_snapshot(&self.decisions.snapshot(), &options)
    }

    /// Execute an explicit snapshot.
    pub fn execute_snapshot(
        &self,
        snapshot: &DecisionSnapshot,
        options: &ExecuteOptions,
    ) -> ExecutionReport {
        let report = executor::execute(&self.scan.matched, snapshot, options, &self.pool, &self.cancel);
        self.cancel.reset();
        let counts = report.counts();
        tracing::info!(
            "{}{} succeeded, {} failed, {} skipped, {} abandoned",
            if options.dry_run { "[dry-run] " } else { "" },
            counts.succeeded,
            counts.failed,
            counts.skipped,
            counts.abandoned
        );
        report
    }

    // -----------------------------------------------------------------------
    // Rescan
    // -----------------------------------------------------------------------

    /// Scan again. Decisions survive for files whose content is unchanged;
    /// a decided file whose fingerprint changed is reset to no-action and
    /// reported as invalidated. A cancelled rescan changes nothing.
    pub fn rescan(&mut self) -> Result<RescanSummary, EngineError> {
        let archive_root = self.scan.archive_root.clone();
        let session_root = self.scan.session_root.clone();
        let fresh = scan_trees(&archive_root, &session_root, &self.config, &self.pool, &self.cancel);
        self.cancel.reset();
        let mut fresh = fresh?;

        let mut summary = RescanSummary::default();
        if fresh.cancelled {
            tracing::info!("rescan cancelled; keeping the previous scan");
            summary.cancelled = true;
            return Ok(summary);
        }

        self.decisions
            .retain_paths(fresh.matched.iter().map(|f| f.relative_path.as_path()));
        for old in &self.scan.matched {
            if fresh.file(&old.relative_path).is_none() {
                summary.removed.push(old.relative_path.clone());
            }
        }

        for file in &fresh.matched {
            let path = &file.relative_path;
            let previous = self.scan.file(path);
            self.decisions
                .register(path, file.has_differences().unwrap_or(false));
            match previous {
                None => summary.added.push(path.clone()),
                Some(old) if old.fingerprint != file.fingerprint => {
                    if self.decisions.invalidate(path)? {
                        tracing::info!("decision for {} invalidated: file changed", path.display());
                        summary.invalidated.push(path.clone());
                    }
                }
                Some(_) => {}
            }
        }

        for path in &summary.invalidated {
            if let Some(file) = fresh.matched.iter().find(|f| &f.relative_path == path) {
                fresh.warnings.push(ScanWarning::new(
                    file.archive_path.clone(),
                    "changed since last scan; decision reset to no-action",
                ));
            }
        }

        self.scan = fresh;
        Ok(summary)
    }
}

fn unknown(relative_path: &Path) -> EngineError {
    EngineError::Decision(DecisionError::UnknownPath {
        path: relative_path.to_path_buf(),
    })
}

fn read_text(path: &Path) -> Result<String, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
