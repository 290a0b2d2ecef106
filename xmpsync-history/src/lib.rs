//! Sidecar history parsing for `xmpsync-history`.
//!
//! [`parse_sidecar`] reads a darktable XMP document and returns its processing
//! history as a normalized [`History`], together with the document-level
//! metadata (tags, top-level attributes, history hashes) used to decide whether
//! two sidecars differ outside their history.
//!
//! Tolerance rules:
//! - no history section → empty history, no warning
//! - a malformed history entry → entry dropped, warning recorded
//! - declared `num` values are advisory; order is document order and identity
//!   is `(operation, multi_priority)`
//! - a document that is not well-formed XML is a [`ParseError`];
//!   [`parse_sidecar_lossy`] turns that into an empty history plus a warning

use std::collections::{BTreeMap, BTreeSet};

use roxmltree::{Document, Node};
use thiserror::Error;

use xmpsync_core::types::{EditStep, History, ParamValue, Parameters};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Fields of a history entry that are part of the step identity or header,
/// never parameters.
const STEP_HEADER_FIELDS: &[&str] = &["num", "operation", "enabled", "multi_priority"];

/// Document attributes that change on every import/export and never count as
/// a metadata difference. History hashes are exposed separately.
const VOLATILE_DOCUMENT_ATTRS: &[&str] = &[
    "import_timestamp",
    "export_timestamp",
    "change_timestamp",
    "print_timestamp",
    "history_end",
    "history_basic_hash",
    "history_auto_hash",
    "history_current_hash",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options that affect normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Per-step fields dropped before comparison (internal version counters).
    pub ignored_parameters: Vec<String>,
}

impl ParseOptions {
    pub fn from_config(config: &xmpsync_core::EngineConfig) -> Self {
        Self {
            ignored_parameters: config.ignored_parameters.clone(),
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignored_parameters.iter().any(|p| p == name)
    }
}

/// Everything extracted from one sidecar document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarDocument {
    pub history: History,
    /// Top-level darktable attributes, volatile ones removed.
    pub attributes: BTreeMap<String, String>,
    /// Sorted, de-duplicated `dc:subject` tags.
    pub tags: Vec<String>,
    pub history_auto_hash: Option<String>,
    pub history_current_hash: Option<String>,
    /// Non-fatal problems, in document order.
    pub warnings: Vec<String>,
}

impl SidecarDocument {
    /// Tags or top-level attributes are equal.
    pub fn metadata_eq(&self, other: &SidecarDocument) -> bool {
        self.attributes == other.attributes && self.tags == other.tags
    }

    /// The current history is the one darktable applied automatically, i.e.
    /// the user never edited this copy.
    pub fn is_unedited(&self) -> bool {
        match (&self.history_auto_hash, &self.history_current_hash) {
            (Some(auto), Some(current)) => auto == current,
            _ => false,
        }
    }
}

/// Document-level parse failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("sidecar is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("sidecar is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a sidecar document.
///
/// Returns `ParseError` only when the document as a whole cannot be read.
/// Problems with individual history entries become warnings.
pub fn parse_sidecar(content: &[u8], options: &ParseOptions) -> Result<SidecarDocument, ParseError> {
    let text = std::str::from_utf8(strip_bom(content))?;
    let doc = Document::parse(text)?;
    Ok(extract(&doc, options))
}

/// Like [`parse_sidecar`], but a document-level failure yields an empty
/// document carrying the error as a warning.
pub fn parse_sidecar_lossy(content: &[u8], options: &ParseOptions) -> SidecarDocument {
    match parse_sidecar(content, options) {
        Ok(doc) => doc,
        Err(err) => SidecarDocument {
            warnings: vec![err.to_string()],
            ..SidecarDocument::default()
        },
    }
}

/// Cheap check that `content` is an XMP packet with an RDF description.
pub fn looks_like_sidecar(content: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(strip_bom(content)) else {
        return false;
    };
    let Ok(doc) = Document::parse(text) else {
        return false;
    };
    doc.descendants()
        .any(|n| n.is_element() && is_rdf(n, "Description"))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn extract(doc: &Document<'_>, options: &ParseOptions) -> SidecarDocument {
    let description = doc
        .descendants()
        .find(|n| n.is_element() && is_rdf(*n, "Description"))
        .unwrap_or_else(|| doc.root_element());

    let mut out = SidecarDocument::default();

    for attr in description.attributes() {
        if !attr.namespace().is_some_and(is_darktable_ns) {
            continue;
        }
        match attr.name() {
            "history_auto_hash" => out.history_auto_hash = Some(attr.value().to_string()),
            "history_current_hash" => out.history_current_hash = Some(attr.value().to_string()),
            name if VOLATILE_DOCUMENT_ATTRS.contains(&name) => {}
            name => {
                out.attributes
                    .insert(name.to_string(), normalize_text(attr.value()));
            }
        }
    }

    let mut raw_steps = Vec::new();
    let mut masks: BTreeMap<u32, Vec<ParamValue>> = BTreeMap::new();
    let mut tags = BTreeSet::new();

    for child in description.children().filter(Node::is_element) {
        let tag = child.tag_name();
        match (tag.name(), tag.namespace()) {
            ("history", Some(ns)) if is_darktable_ns(ns) => {
                raw_steps.extend(rdf_items(child));
            }
            ("masks_history", Some(ns)) if is_darktable_ns(ns) => {
                for (pos, li) in rdf_items(child).enumerate() {
                    collect_mask(li, pos, options, &mut masks, &mut out.warnings);
                }
            }
            ("subject", Some(DC_NS)) => {
                for li in rdf_items(child) {
                    let text = normalize_text(li.text().unwrap_or_default());
                    if !text.is_empty() {
                        tags.insert(text);
                    }
                }
            }
            _ => {}
        }
    }

    // Masks are keyed by the history entry's declared `num`.
    let mut numbered: Vec<(Option<u32>, EditStep)> = Vec::new();
    for (pos, li) in raw_steps.into_iter().enumerate() {
        match parse_step(li, pos, options) {
            Ok(parsed) => numbered.push(parsed),
            Err(message) => out.warnings.push(message),
        }
    }

    for (num, mut step) in numbered {
        if let Some(mask_list) = num.and_then(|n| masks.get(&n)) {
            let mut sorted = mask_list.clone();
            sorted.sort_by_key(|v| v.to_string());
            step.parameters
                .insert("masks".to_string(), ParamValue::Seq(sorted));
        }
        let key = step.key();
        if out.history.push(step).is_err() {
            out.warnings.push(format!(
                "history entry {key} appears more than once; later entry dropped"
            ));
        }
    }

    out.tags = tags.into_iter().collect();
    out
}

/// Parse one `rdf:li` history entry. Returns the declared `num` alongside the
/// step, or a warning message when the entry is malformed.
fn parse_step(
    li: Node<'_, '_>,
    pos: usize,
    options: &ParseOptions,
) -> Result<(Option<u32>, EditStep), String> {
    let fields = darktable_fields(li);

    let module_id = match fields.get("operation") {
        Some(ParamValue::Text(op)) if !op.is_empty() => op.clone(),
        _ => return Err(format!("history entry {pos}: missing operation")),
    };

    let num = match fields.get("num") {
        None => None,
        Some(ParamValue::Int(n)) if *n >= 0 && *n <= i64::from(u32::MAX) => Some(*n as u32),
        Some(other) => {
            return Err(format!(
                "history entry {pos} ({module_id}): invalid num '{other}'"
            ))
        }
    };

    let instance = match fields.get("multi_priority") {
        None => 0,
        Some(ParamValue::Int(n)) if *n >= 0 && *n <= i64::from(u32::MAX) => *n as u32,
        Some(other) => {
            return Err(format!(
                "history entry {pos} ({module_id}): invalid multi_priority '{other}'"
            ))
        }
    };

    let enabled = match fields.get("enabled") {
        None => true,
        Some(ParamValue::Int(1)) | Some(ParamValue::Bool(true)) => true,
        Some(ParamValue::Int(0)) | Some(ParamValue::Bool(false)) => false,
        Some(other) => {
            return Err(format!(
                "history entry {pos} ({module_id}): invalid enabled flag '{other}'"
            ))
        }
    };

    let parameters: Parameters = fields
        .into_iter()
        .filter(|(name, _)| !STEP_HEADER_FIELDS.contains(&name.as_str()))
        .filter(|(name, _)| !options.is_ignored(name))
        .collect();

    let step = EditStep {
        index: num.unwrap_or(pos as u32),
        module_id,
        instance,
        enabled,
        parameters,
    };
    Ok((num, step))
}

fn collect_mask(
    li: Node<'_, '_>,
    pos: usize,
    options: &ParseOptions,
    masks: &mut BTreeMap<u32, Vec<ParamValue>>,
    warnings: &mut Vec<String>,
) {
    let mut fields = darktable_fields(li);
    let num = match fields.remove("mask_num") {
        Some(ParamValue::Int(n)) if n >= 0 && n <= i64::from(u32::MAX) => n as u32,
        _ => {
            warnings.push(format!("mask entry {pos}: missing or invalid mask_num"));
            return;
        }
    };
    fields.retain(|name, _| !options.is_ignored(name));
    masks.entry(num).or_default().push(ParamValue::Map(fields));
}

/// Collect `darktable:` fields of an element, from attributes and from child
/// elements (older sidecars use the element form).
fn darktable_fields(node: Node<'_, '_>) -> Parameters {
    let mut fields = Parameters::new();
    for attr in node.attributes() {
        if attr.namespace().is_some_and(is_darktable_ns) {
            fields.insert(
                attr.name().to_string(),
                ParamValue::from_scalar(&normalize_text(attr.value())),
            );
        }
    }
    for child in node.children().filter(Node::is_element) {
        if child.tag_name().namespace().is_some_and(is_darktable_ns) {
            fields.insert(child.tag_name().name().to_string(), element_value(child));
        }
    }
    fields
}

/// Structural value of an element: a container (`rdf:Seq`/`Bag`/`Alt`) becomes
/// a sequence, an element with fields becomes a mapping, anything else is a
/// scalar from its text.
fn element_value(node: Node<'_, '_>) -> ParamValue {
    if let Some(container) = node
        .children()
        .find(|c| c.is_element() && is_rdf_container(*c))
    {
        let mut items: Vec<ParamValue> = container
            .children()
            .filter(|c| c.is_element() && is_rdf(*c, "li"))
            .map(element_value)
            .collect();
        if is_rdf(container, "Bag") {
            items.sort_by_key(|v| v.to_string());
        }
        return ParamValue::Seq(items);
    }

    let fields = darktable_fields(node);
    if !fields.is_empty() {
        return ParamValue::Map(fields);
    }

    ParamValue::from_scalar(&normalize_text(node.text().unwrap_or_default()))
}

/// `rdf:li` children of the first RDF container below `node`.
fn rdf_items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && is_rdf_container(*c))
        .into_iter()
        .flat_map(|container| container.children())
        .filter(|c| c.is_element() && is_rdf(*c, "li"))
}

fn is_rdf(node: Node<'_, '_>, local: &str) -> bool {
    node.tag_name().name() == local && node.tag_name().namespace() == Some(RDF_NS)
}

fn is_rdf_container(node: Node<'_, '_>) -> bool {
    is_rdf(node, "Seq") || is_rdf(node, "Bag") || is_rdf(node, "Alt")
}

/// darktable has used a few namespace URIs over the years; all contain the name.
fn is_darktable_ns(ns: &str) -> bool {
    ns.contains("darktable")
}

/// Trim and collapse internal whitespace runs.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_bom(content: &[u8]) -> &[u8] {
    content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
