//! Step-level comparison of two histories.
//!
//! Steps are matched by identity `(module_id, instance)`, never by position.
//! Order differences are judged by rank within the subset of identities
//! present on both sides, so an insertion alone does not shift everything
//! after it into "order differs".

use std::collections::HashMap;

use serde::Serialize;
use similar::TextDiff;

use xmpsync_core::{DiffFacet, EditStep, History, StepClass, StepDiffEntry, StepKey};

/// Compare two histories.
///
/// Entries follow archive order, then session-only steps in session order.
/// Every identity on either side appears exactly once.
pub fn diff_histories(archive: &History, session: &History) -> Vec<StepDiffEntry> {
    let archive_steps: HashMap<StepKey, &EditStep> =
        archive.steps().iter().map(|s| (s.key(), s)).collect();
    let session_steps: HashMap<StepKey, &EditStep> =
        session.steps().iter().map(|s| (s.key(), s)).collect();

    let archive_rank = common_ranks(archive, &session_steps);
    let session_rank = common_ranks(session, &archive_steps);

    let mut entries = Vec::with_capacity(archive.len() + session.len());

    for step in archive.steps() {
        let key = step.key();
        let counterpart = session_steps.get(&key).copied();
        let mut facets = Vec::new();

        match counterpart {
            None => facets.push(DiffFacet::RemovedFromArchive),
            Some(other) => {
                let fields = step.differing_fields(other);
                if !fields.is_empty() {
                    facets.push(DiffFacet::ParametersDiffer { fields });
                }
                let (a, s) = (archive_rank[&key], session_rank[&key]);
                if a != s {
                    facets.push(DiffFacet::OrderDiffers {
                        archive_rank: a,
                        session_rank: s,
                    });
                }
            }
        }

        entries.push(StepDiffEntry {
            key,
            archive_index: Some(step.index),
            session_index: counterpart.map(|o| o.index),
            facets,
        });
    }

    for step in session.steps() {
        let key = step.key();
        if archive_steps.contains_key(&key) {
            continue;
        }
        entries.push(StepDiffEntry {
            key,
            archive_index: None,
            session_index: Some(step.index),
            facets: vec![DiffFacet::AddedInSession],
        });
    }

    entries
}

/// Rank of each identity of `history` that also appears in `other`.
fn common_ranks(history: &History, other: &HashMap<StepKey, &EditStep>) -> HashMap<StepKey, usize> {
    history
        .keys()
        .filter(|k| other.contains_key(k))
        .enumerate()
        .map(|(rank, key)| (key, rank))
        .collect()
}

/// Diff of a history against itself, used when both documents are
/// byte-identical and only one side was parsed.
pub fn identical_diff(history: &History) -> Vec<StepDiffEntry> {
    history
        .steps()
        .iter()
        .map(|s| StepDiffEntry {
            key: s.key(),
            archive_index: Some(s.index),
            session_index: Some(s.index),
            facets: Vec::new(),
        })
        .collect()
}

/// Per-class counts over a diff, keyed by primary class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub parameters: usize,
    pub order: usize,
    pub identical: usize,
}

impl DiffSummary {
    pub fn of(entries: &[StepDiffEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.primary_class() {
                StepClass::AddedInSession => summary.added += 1,
                StepClass::RemovedFromArchive => summary.removed += 1,
                StepClass::ParametersDiffer => summary.parameters += 1,
                StepClass::OrderDiffers => summary.order += 1,
                StepClass::Identical => summary.identical += 1,
            }
        }
        summary
    }

    pub fn differing(&self) -> usize {
        self.added + self.removed + self.parameters + self.order
    }
}

/// Unified line diff of two raw documents, archive as `a/`, session as `b/`.
/// Empty when the texts are equal.
pub fn raw_diff(archive_text: &str, session_text: &str, relative_path: &str) -> String {
    if archive_text == session_text {
        return String::new();
    }
    TextDiff::from_lines(archive_text, session_text)
        .unified_diff()
        .context_radius(3)
        .header(
            &format!("a/{relative_path}"),
            &format!("b/{relative_path}"),
        )
        .to_string()
}
