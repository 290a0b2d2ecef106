//! Per-path decision store.
//!
//! Every matched file has exactly one entry. Any decision may move to any other
//! by an explicit [`DecisionStore::set`]; the only automatic transition is
//! [`DecisionStore::invalidate`], used when a rescan finds changed content.
//! Executing a plan never touches the store, so the same plan can be run as a
//! dry run first and for real afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DecisionError;
use crate::types::Decision;

/// State tracked for one matched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub decision: Decision,
    /// Seeded from the diff when the file is registered.
    pub has_differences: bool,
    /// The previous decision was reset because the files changed on disk.
    pub invalidated: bool,
}

/// Aggregate counts for filtering in a presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DecisionCounts {
    pub decided: usize,
    pub undecided: usize,
    pub decided_with_differences: usize,
    pub undecided_with_differences: usize,
    pub invalidated: usize,
}

/// Decisions keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct DecisionStore {
    entries: BTreeMap<PathBuf, DecisionEntry>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path with `NoAction`. Re-registering keeps the current decision and
    /// refreshes the differences flag.
    pub fn register(&mut self, relative_path: impl Into<PathBuf>, has_differences: bool) {
        self.entries
            .entry(relative_path.into())
            .and_modify(|e| e.has_differences = has_differences)
            .or_insert(DecisionEntry {
                decision: Decision::NoAction,
                has_differences,
                invalidated: false,
            });
    }

    /// Set the decision for a path, returning the previous one.
    pub fn set(
        &mut self,
        relative_path: &Path,
        decision: Decision,
    ) -> Result<Decision, DecisionError> {
        let entry = self.entry_mut(relative_path)?;
        let previous = entry.decision;
        entry.decision = decision;
        entry.invalidated = false;
        Ok(previous)
    }

    pub fn get(&self, relative_path: &Path) -> Result<Decision, DecisionError> {
        self.entry(relative_path).map(|e| e.decision)
    }

    pub fn entry(&self, relative_path: &Path) -> Result<DecisionEntry, DecisionError> {
        self.entries
            .get(relative_path)
            .copied()
            .ok_or_else(|| DecisionError::UnknownPath {
                path: relative_path.to_path_buf(),
            })
    }

    /// Reset to `NoAction` and flag the entry. Returns whether a real decision was
    /// discarded.
    pub fn invalidate(&mut self, relative_path: &Path) -> Result<bool, DecisionError> {
        let entry = self.entry_mut(relative_path)?;
        let discarded = entry.decision.is_decided();
        entry.decision = Decision::NoAction;
        entry.invalidated = discarded;
        Ok(discarded)
    }

    /// Drop every path not in `keep`.
    pub fn retain_paths<'a>(&mut self, keep: impl IntoIterator<Item = &'a Path>) {
        let keep: std::collections::BTreeSet<&Path> = keep.into_iter().collect();
        self.entries.retain(|path, _| keep.contains(path.as_path()));
    }

    /// Apply one decision to every registered path, optionally only those with
    /// differences. Returns the number of entries touched.
    pub fn set_all(&mut self, decision: Decision, only_with_differences: bool) -> usize {
        let mut touched = 0;
        for entry in self.entries.values_mut() {
            if only_with_differences && !entry.has_differences {
                continue;
            }
            entry.decision = decision;
            entry.invalidated = false;
            touched += 1;
        }
        touched
    }

    pub fn counts(&self) -> DecisionCounts {
        let mut counts = DecisionCounts::default();
        for entry in self.entries.values() {
            match (entry.decision.is_decided(), entry.has_differences) {
                (true, true) => {
                    counts.decided += 1;
                    counts.decided_with_differences += 1;
                }
                (true, false) => counts.decided += 1,
                (false, true) => {
                    counts.undecided += 1;
                    counts.undecided_with_differences += 1;
                }
                (false, false) => counts.undecided += 1,
            }
            if entry.invalidated {
                counts.invalidated += 1;
            }
        }
        counts
    }

    /// Immutable copy of the current decisions, for execution.
    pub fn snapshot(&self) -> DecisionSnapshot {
        DecisionSnapshot(
            self.entries
                .iter()
                .map(|(path, entry)| (path.clone(), entry.decision))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &DecisionEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_path(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, relative_path: &Path) -> Result<&mut DecisionEntry, DecisionError> {
        self.entries
            .get_mut(relative_path)
            .ok_or_else(|| DecisionError::UnknownPath {
                path: relative_path.to_path_buf(),
            })
    }
}

/// Frozen decisions handed to the executor. Paths missing from the snapshot
/// are treated as `NoAction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSnapshot(BTreeMap<PathBuf, Decision>);

impl DecisionSnapshot {
    pub fn get(&self, relative_path: &Path) -> Decision {
        self.0.get(relative_path).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, Decision)> {
        self.0.iter().map(|(p, d)| (p.as_path(), *d))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PathBuf, Decision)> for DecisionSnapshot {
    fn from_iter<I: IntoIterator<Item = (PathBuf, Decision)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DecisionStore {
        let mut store = DecisionStore::new();
        store.register("a/1.nef.xmp", true);
        store.register("a/2.nef.xmp", false);
        store
    }

    #[test]
    fn registered_paths_start_with_no_action() {
        let store = store();
        assert_eq!(
            store.get(Path::new("a/1.nef.xmp")).unwrap(),
            Decision::NoAction
        );
    }

    #[test]
    fn any_state_reaches_any_state() {
        let mut store = store();
        let path = Path::new("a/1.nef.xmp");
        for from in Decision::all() {
            for to in Decision::all() {
                store.set(path, *from).unwrap();
                let previous = store.set(path, *to).unwrap();
                assert_eq!(previous, *from);
                assert_eq!(store.get(path).unwrap(), *to);
            }
        }
    }

    #[test]
    fn unknown_path_is_an_error() {
        let mut store = store();
        let err = store
            .set(Path::new("missing.xmp"), Decision::KeepBoth)
            .unwrap_err();
        assert_eq!(
            err,
            DecisionError::UnknownPath {
                path: PathBuf::from("missing.xmp")
            }
        );
    }

    #[test]
    fn re_register_keeps_decision() {
        let mut store = store();
        let path = Path::new("a/1.nef.xmp");
        store.set(path, Decision::KeepSession).unwrap();
        store.register("a/1.nef.xmp", false);
        let entry = store.entry(path).unwrap();
        assert_eq!(entry.decision, Decision::KeepSession);
        assert!(!entry.has_differences);
    }

    #[test]
    fn invalidate_resets_and_flags() {
        let mut store = store();
        let path = Path::new("a/1.nef.xmp");
        store.set(path, Decision::KeepArchive).unwrap();
        assert!(store.invalidate(path).unwrap());
        let entry = store.entry(path).unwrap();
        assert_eq!(entry.decision, Decision::NoAction);
        assert!(entry.invalidated);

        store.set(path, Decision::KeepBoth).unwrap();
        assert!(!store.entry(path).unwrap().invalidated);
    }

    #[test]
    fn counts_split_by_differences() {
        let mut store = store();
        store
            .set(Path::new("a/1.nef.xmp"), Decision::KeepSession)
            .unwrap();
        let counts = store.counts();
        assert_eq!(counts.decided, 1);
        assert_eq!(counts.undecided, 1);
        assert_eq!(counts.decided_with_differences, 1);
        assert_eq!(counts.undecided_with_differences, 0);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let mut store = store();
        let path = Path::new("a/1.nef.xmp");
        store.set(path, Decision::KeepSession).unwrap();
        let snapshot = store.snapshot();
        store.set(path, Decision::NoAction).unwrap();
        assert_eq!(snapshot.get(path), Decision::KeepSession);
        assert_eq!(snapshot.get(Path::new("unknown.xmp")), Decision::NoAction);
    }
}
