//! Pair sidecars that exist under both roots by relative path.
//!
//! Both trees are walked with symlinks left unfollowed. Unreadable
//! directories become warnings and the walk continues. Output lists are
//! sorted by relative path (components joined with `/`) so results do not
//! depend on filesystem enumeration order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use xmpsync_core::{ConfigError, EngineConfig, ScanWarning};

use crate::backup::is_backup_file;

/// A relative path found under both roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub relative_path: PathBuf,
    pub archive_path: PathBuf,
    pub session_path: PathBuf,
}

/// Result of walking and pairing both trees.
#[derive(Debug, Clone, Default)]
pub struct TreeMatch {
    pub matched: Vec<MatchedPair>,
    pub archive_only: Vec<PathBuf>,
    pub session_only: Vec<PathBuf>,
    pub warnings: Vec<ScanWarning>,
}

/// A sidecar found during one walk.
#[derive(Debug, Clone)]
struct Found {
    relative: PathBuf,
    absolute: PathBuf,
}

/// Check both roots and return their canonical forms.
pub fn validate_roots(
    archive_root: &Path,
    session_root: &Path,
) -> Result<(PathBuf, PathBuf), ConfigError> {
    let archive = check_root("archive", archive_root)?;
    let session = check_root("session", session_root)?;

    if archive == session {
        return Err(ConfigError::IdenticalRoots { path: archive });
    }
    if session.starts_with(&archive) {
        return Err(ConfigError::NestedRoots {
            outer: archive,
            inner: session,
        });
    }
    if archive.starts_with(&session) {
        return Err(ConfigError::NestedRoots {
            outer: session,
            inner: archive,
        });
    }
    Ok((archive, session))
}

fn check_root(side: &'static str, root: &Path) -> Result<PathBuf, ConfigError> {
    let meta = match std::fs::metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::RootMissing {
                side,
                path: root.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(ConfigError::Resolve {
                side,
                path: root.to_path_buf(),
                source: e,
            })
        }
    };
    if !meta.is_dir() {
        return Err(ConfigError::RootNotDirectory {
            side,
            path: root.to_path_buf(),
        });
    }
    root.canonicalize().map_err(|e| ConfigError::Resolve {
        side,
        path: root.to_path_buf(),
        source: e,
    })
}

/// Walk both roots and pair sidecars by relative path.
///
/// Roots are assumed valid (see [`validate_roots`]).
pub fn match_trees(archive_root: &Path, session_root: &Path, config: &EngineConfig) -> TreeMatch {
    let mut warnings = Vec::new();
    let mut archive = walk_sidecars(archive_root, config, &mut warnings);
    let session = walk_sidecars(session_root, config, &mut warnings);

    let mut matched = Vec::new();
    let mut session_only = Vec::new();

    for (key, found) in session {
        if let Some(a) = archive.remove(&key) {
            matched.push(MatchedPair {
                relative_path: found.relative,
                archive_path: a.absolute,
                session_path: found.absolute,
            });
        } else {
            session_only.push((key, found));
        }
    }

    // On a case-insensitive archive volume the spelling may differ while the
    // file is the same. Probe the session spelling under the archive root.
    if !session_only.is_empty() && !archive.is_empty() {
        let mut by_folded: HashMap<String, String> = archive
            .keys()
            .map(|k| (k.to_lowercase(), k.clone()))
            .collect();
        session_only.retain(|(key, found)| {
            let Some(archive_key) = by_folded.get(&key.to_lowercase()).cloned() else {
                return true;
            };
            if !archive_root.join(&found.relative).is_file() {
                return true;
            }
            let Some(a) = archive.remove(&archive_key) else {
                return true;
            };
            by_folded.remove(&key.to_lowercase());
            debug!(
                "paired {} with archive spelling {}",
                found.relative.display(),
                a.relative.display()
            );
            matched.push(MatchedPair {
                relative_path: found.relative.clone(),
                archive_path: a.absolute,
                session_path: found.absolute.clone(),
            });
            false
        });
    }

    matched.sort_by_key(|p| relative_key(&p.relative_path));

    TreeMatch {
        matched,
        archive_only: archive.into_values().map(|f| f.relative).collect(),
        session_only: session_only.into_iter().map(|(_, f)| f.relative).collect(),
        warnings,
    }
}

/// `/`-joined relative path used for sorting and pairing. `.` components
/// are dropped.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `relative` with `.` components dropped, as callers may spell it.
pub fn clean_relative(relative: &Path) -> PathBuf {
    relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn walk_sidecars(
    root: &Path,
    config: &EngineConfig,
    warnings: &mut Vec<ScanWarning>,
) -> BTreeMap<String, Found> {
    let mut found = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                warn!("skipping {}: {err}", path.display());
                warnings.push(ScanWarning::new(path, err.to_string()));
                continue;
            }
        };

        if entry.path_is_symlink() {
            debug!("skipping symlink {}", entry.path().display());
            continue;
        }
        if !entry.file_type().is_file() || !config.is_sidecar(entry.path()) {
            continue;
        }
        if is_backup_file(entry.path()) {
            debug!("skipping backup {}", entry.path().display());
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_path_buf();
        found.insert(
            relative_key(&relative),
            Found {
                relative,
                absolute: entry.path().to_path_buf(),
            },
        );
    }

    found
}
