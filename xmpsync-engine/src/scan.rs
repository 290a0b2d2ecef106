//! Scan two trees: pair sidecars, parse both histories, compare them.
//!
//! Per-file work runs on the worker pool. A file that cannot be read or parsed
//! still appears in the result with an empty history and a warning; only an
//! unusable configuration or an empty match set stops the scan.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use xmpsync_core::{EngineConfig, MatchedFile, PairFingerprint, ScanWarning};
use xmpsync_history::{parse_sidecar_lossy, ParseOptions, SidecarDocument};

use crate::diff::{diff_histories, identical_diff};
use crate::error::EngineError;
use crate::fingerprint::hash_bytes;
use crate::matcher::{match_trees, validate_roots, MatchedPair};
use crate::pool::{CancelToken, WorkerPool};

/// Everything one scan produced.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub archive_root: PathBuf,
    pub session_root: PathBuf,
    /// Sorted by relative path.
    pub matched: Vec<MatchedFile>,
    pub archive_only: Vec<PathBuf>,
    pub session_only: Vec<PathBuf>,
    pub warnings: Vec<ScanWarning>,
    /// The scan was cancelled; `matched` holds only the files that finished.
    pub cancelled: bool,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn file(&self, relative_path: &Path) -> Option<&MatchedFile> {
        self.matched
            .binary_search_by(|f| {
                crate::matcher::relative_key(&f.relative_path)
                    .cmp(&crate::matcher::relative_key(relative_path))
            })
            .ok()
            .map(|i| &self.matched[i])
    }

    /// Matched files whose histories or metadata differ.
    pub fn with_differences(&self) -> impl Iterator<Item = &MatchedFile> {
        self.matched
            .iter()
            .filter(|f| f.has_differences().unwrap_or(false))
    }
}

/// Validate roots, match, then parse and compare every pair.
pub fn scan_trees(
    archive_root: &Path,
    session_root: &Path,
    config: &EngineConfig,
    pool: &WorkerPool,
    cancel: &CancelToken,
) -> Result<ScanResult, EngineError> {
    config.validate()?;
    let (archive_root, session_root) = validate_roots(archive_root, session_root)?;
    tracing::info!(
        "scanning {} against {}",
        archive_root.display(),
        session_root.display()
    );

    let tree = match_trees(&archive_root, &session_root, config);
    if tree.matched.is_empty() {
        return Err(EngineError::NoMatchedFiles {
            archive_only: tree.archive_only.len(),
            session_only: tree.session_only.len(),
        });
    }

    let options = ParseOptions::from_config(config);
    let analyzed = pool.map_ordered(&tree.matched, cancel, |pair| analyze_pair(pair, &options));

    let mut warnings = tree.warnings;
    let mut matched = Vec::with_capacity(analyzed.len());
    let mut cancelled = false;
    for result in analyzed {
        let Some((file, file_warnings)) = result else {
            cancelled = true;
            continue;
        };
        warnings.extend(file_warnings);
        matched.push(file);
    }

    tracing::info!(
        "matched {} sidecars ({} archive-only, {} session-only, {} warnings)",
        matched.len(),
        tree.archive_only.len(),
        tree.session_only.len(),
        warnings.len()
    );

    Ok(ScanResult {
        archive_root,
        session_root,
        matched,
        archive_only: tree.archive_only,
        session_only: tree.session_only,
        warnings,
        cancelled,
        scanned_at: Utc::now(),
    })
}

/// Read, fingerprint, parse and diff one pair.
pub(crate) fn analyze_pair(
    pair: &MatchedPair,
    options: &ParseOptions,
) -> (MatchedFile, Vec<ScanWarning>) {
    let mut warnings = Vec::new();
    let archive_bytes = read_or_warn(&pair.archive_path, &mut warnings);
    let session_bytes = read_or_warn(&pair.session_path, &mut warnings);

    let fingerprint = PairFingerprint {
        archive: hash_bytes(archive_bytes.as_deref().unwrap_or_default()),
        session: hash_bytes(session_bytes.as_deref().unwrap_or_default()),
    };
    let byte_identical = archive_bytes.is_some() && archive_bytes == session_bytes;

    let archive_doc = parse_side(&pair.archive_path, archive_bytes.as_deref(), options, &mut warnings);

    let (session_doc, diff) = if byte_identical {
        let diff = identical_diff(&archive_doc.history);
        (archive_doc.clone(), diff)
    } else {
        let session_doc =
            parse_side(&pair.session_path, session_bytes.as_deref(), options, &mut warnings);
        let diff = diff_histories(&archive_doc.history, &session_doc.history);
        (session_doc, diff)
    };

    let file = MatchedFile {
        relative_path: pair.relative_path.clone(),
        archive_path: pair.archive_path.clone(),
        session_path: pair.session_path.clone(),
        metadata_differs: !byte_identical && !archive_doc.metadata_eq(&session_doc),
        session_unedited: session_doc.is_unedited(),
        archive_history: archive_doc.history,
        session_history: session_doc.history,
        diff: Some(diff),
        fingerprint,
        byte_identical,
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
    };
    (file, warnings)
}

fn read_or_warn(path: &Path, warnings: &mut Vec<ScanWarning>) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!("cannot read {}: {err}", path.display());
            warnings.push(ScanWarning::new(path, format!("unreadable: {err}")));
            None
        }
    }
}

/// Unreadable files parse as an empty document; the read already warned.
fn parse_side(
    path: &Path,
    bytes: Option<&[u8]>,
    options: &ParseOptions,
    warnings: &mut Vec<ScanWarning>,
) -> SidecarDocument {
    let Some(bytes) = bytes else {
        return SidecarDocument::default();
    };
    let doc = parse_sidecar_lossy(bytes, options);
    for message in &doc.warnings {
        tracing::warn!("{}: {message}", path.display());
        warnings.push(ScanWarning::new(path, message.clone()));
    }
    doc
}
