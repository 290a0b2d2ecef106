//! Domain types for xmpsync.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Parameter values are a tagged-union tree so that module-specific shapes can be
//! compared structurally without a schema.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of an edit step within one history: `(module_id, instance)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub module_id: String,
    pub instance: u32,
}

impl StepKey {
    pub fn new(module_id: impl Into<String>, instance: u32) -> Self {
        Self {
            module_id: module_id.into(),
            instance,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.module_id, self.instance)
    }
}

/// Which tree a path or document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Archive,
    Session,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Archive => "archive",
            Side::Session => "session",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Parameter values
// ---------------------------------------------------------------------------

/// Normalized parameter value.
///
/// Mappings are key-sorted so that blobs which differ only in key order compare
/// equal. Numbers are only recognized in canonical spelling (no leading zeros),
/// which keeps hex-encoded blobs like `00000000` as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Seq(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Normalize a scalar as it appears in a document.
    pub fn from_scalar(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if is_canonical_number(trimmed) {
            if let Ok(int) = trimmed.parse::<i64>() {
                return ParamValue::Int(int);
            }
            if let Ok(float) = trimmed.parse::<f64>() {
                if float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
                    return ParamValue::Int(float as i64);
                }
                return ParamValue::Float(float);
            }
        }
        ParamValue::Text(trimmed.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ParamValue::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?`
fn is_canonical_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return false;
    }
    match frac_part {
        Some(f) => !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    }
}

/// Parameter name → normalized value.
pub type Parameters = BTreeMap<String, ParamValue>;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One entry in a processing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditStep {
    /// Declared position; advisory only.
    pub index: u32,
    pub module_id: String,
    #[serde(default)]
    pub instance: u32,
    pub enabled: bool,
    #[serde(default)]
    pub parameters: Parameters,
}

impl EditStep {
    pub fn key(&self) -> StepKey {
        StepKey::new(self.module_id.clone(), self.instance)
    }

    /// Names of the fields that differ from `other`, including `enabled`.
    /// Sorted, without duplicates.
    pub fn differing_fields(&self, other: &EditStep) -> Vec<String> {
        let mut fields = Vec::new();
        if self.enabled != other.enabled {
            fields.push("enabled".to_string());
        }
        for (name, value) in &self.parameters {
            if other.parameters.get(name) != Some(value) {
                fields.push(name.clone());
            }
        }
        for name in other.parameters.keys() {
            if !self.parameters.contains_key(name) {
                fields.push(name.clone());
            }
        }
        fields.sort();
        fields.dedup();
        fields
    }
}

/// Ordered sequence of edit steps in declaration order.
///
/// `(module_id, instance)` is unique; [`History::push`] refuses duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    steps: Vec<EditStep>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Returns the step back if its identity is already present.
    pub fn push(&mut self, step: EditStep) -> Result<(), EditStep> {
        if self.contains(&step.key()) {
            return Err(step);
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn contains(&self, key: &StepKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &StepKey) -> Option<&EditStep> {
        self.steps
            .iter()
            .find(|s| s.module_id == key.module_id && s.instance == key.instance)
    }

    pub fn steps(&self) -> &[EditStep] {
        &self.steps
    }

    pub fn keys(&self) -> impl Iterator<Item = StepKey> + '_ {
        self.steps.iter().map(EditStep::key)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl TryFrom<Vec<EditStep>> for History {
    type Error = EditStep;

    fn try_from(steps: Vec<EditStep>) -> Result<Self, Self::Error> {
        let mut history = History::new();
        for step in steps {
            history.push(step)?;
        }
        Ok(history)
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// One facet of difference for a step identity. An entry with no facets is
/// identical on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffFacet {
    AddedInSession,
    RemovedFromArchive,
    ParametersDiffer { fields: Vec<String> },
    OrderDiffers { archive_rank: usize, session_rank: usize },
}

/// Display classification, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepClass {
    AddedInSession,
    RemovedFromArchive,
    ParametersDiffer,
    OrderDiffers,
    Identical,
}

impl fmt::Display for StepClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepClass::AddedInSession => "added",
            StepClass::RemovedFromArchive => "removed",
            StepClass::ParametersDiffer => "params",
            StepClass::OrderDiffers => "order",
            StepClass::Identical => "identical",
        };
        f.write_str(s)
    }
}

/// Comparison result for one step identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDiffEntry {
    pub key: StepKey,
    pub archive_index: Option<u32>,
    pub session_index: Option<u32>,
    pub facets: Vec<DiffFacet>,
}

impl StepDiffEntry {
    pub fn is_identical(&self) -> bool {
        self.facets.is_empty()
    }

    pub fn has(&self, class: StepClass) -> bool {
        match class {
            StepClass::Identical => self.is_identical(),
            _ => self.facets.iter().any(|f| facet_class(f) == class),
        }
    }

    /// Single class for compact display. ParametersDiffer wins over OrderDiffers.
    pub fn primary_class(&self) -> StepClass {
        [
            StepClass::AddedInSession,
            StepClass::RemovedFromArchive,
            StepClass::ParametersDiffer,
            StepClass::OrderDiffers,
        ]
        .into_iter()
        .find(|c| self.has(*c))
        .unwrap_or(StepClass::Identical)
    }

    pub fn differing_fields(&self) -> &[String] {
        self.facets
            .iter()
            .find_map(|f| match f {
                DiffFacet::ParametersDiffer { fields } => Some(fields.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

fn facet_class(facet: &DiffFacet) -> StepClass {
    match facet {
        DiffFacet::AddedInSession => StepClass::AddedInSession,
        DiffFacet::RemovedFromArchive => StepClass::RemovedFromArchive,
        DiffFacet::ParametersDiffer { .. } => StepClass::ParametersDiffer,
        DiffFacet::OrderDiffers { .. } => StepClass::OrderDiffers,
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Planned synchronization action for one matched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    #[default]
    NoAction,
    KeepArchive,
    KeepSession,
    KeepBoth,
}

impl Decision {
    pub fn all() -> &'static [Decision] {
        &[
            Decision::NoAction,
            Decision::KeepArchive,
            Decision::KeepSession,
            Decision::KeepBoth,
        ]
    }

    /// Anything other than `NoAction` counts as decided.
    pub fn is_decided(self) -> bool {
        self != Decision::NoAction
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::NoAction => "no-action",
            Decision::KeepArchive => "keep-archive",
            Decision::KeepSession => "keep-session",
            Decision::KeepBoth => "keep-both",
        };
        f.write_str(s)
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "no-action" | "none" => Ok(Decision::NoAction),
            "keep-archive" | "archive" => Ok(Decision::KeepArchive),
            "keep-session" | "session" => Ok(Decision::KeepSession),
            "keep-both" | "both" => Ok(Decision::KeepBoth),
            other => Err(format!(
                "unknown decision '{other}'; expected: no-action, keep-archive, keep-session, keep-both"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan products
// ---------------------------------------------------------------------------

/// SHA-256 digests of both documents at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFingerprint {
    pub archive: String,
    pub session: String,
}

/// A relative path present in both trees, with its parsed histories and diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedFile {
    pub relative_path: PathBuf,
    pub archive_path: PathBuf,
    pub session_path: PathBuf,
    pub archive_history: History,
    pub session_history: History,
    /// `None` until compared.
    pub diff: Option<Vec<StepDiffEntry>>,
    pub fingerprint: PairFingerprint,
    /// Both documents were byte-identical; the session side was not parsed.
    pub byte_identical: bool,
    /// Tags or top-level document attributes differ outside the history.
    pub metadata_differs: bool,
    /// Session document reports its history as unchanged since auto-apply.
    pub session_unedited: bool,
    /// Non-fatal parse problems for either side.
    pub warnings: Vec<String>,
}

impl MatchedFile {
    /// `None` when the diff has not been computed yet.
    pub fn has_differences(&self) -> Option<bool> {
        self.diff
            .as_ref()
            .map(|d| self.metadata_differs || d.iter().any(|e| !e.is_identical()))
    }

    pub fn path_for(&self, side: Side) -> &PathBuf {
        match side {
            Side::Archive => &self.archive_path,
            Side::Session => &self.session_path,
        }
    }
}

/// A non-fatal problem attached to a specific path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

impl ScanWarning {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// A planned filesystem action derived from a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub backup_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
