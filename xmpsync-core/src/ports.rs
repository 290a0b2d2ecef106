//! Collaborator interfaces the engine calls through but does not implement.
//!
//! A presentation layer plugs in a preview renderer (typically a wrapper around
//! an external raw converter with its own cache) and an external editor
//! launcher. The engine never depends on either being available.

use std::path::{Path, PathBuf};

use crate::types::{Decision, Side};

/// Raw image extensions recognized when inferring an image from its sidecar.
pub const RAW_EXTENSIONS: &[&str] = &["nef", "cr2", "cr3", "arw", "dng", "raf", "orf", "rw2"];

/// What to render: one side of one matched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    pub side: Side,
    pub sidecar_path: PathBuf,
    /// `None` when no image could be located next to the sidecar.
    pub image_path: Option<PathBuf>,
    pub max_dimension: u32,
}

/// Opaque, cacheable reference to a rendered preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHandle(pub PathBuf);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewStatus {
    Ready(PreviewHandle),
    Queued,
    Failed(String),
}

/// Rendering service port.
pub trait PreviewRenderer: Send + Sync {
    fn request_preview(&self, request: &PreviewRequest) -> PreviewStatus;
}

/// External editor port. Given both versions of one file, runs an interactive
/// session and reports which version to adopt, if any.
pub trait ExternalEditor {
    fn reconcile(&mut self, archive_sidecar: &Path, session_sidecar: &Path) -> Option<Decision>;
}

/// Locate the raw image a sidecar describes.
///
/// `photo.nef.xmp` → `photo.nef`. Duplicate sidecars (`photo_01.nef.xmp`) fall
/// back to the original image (`photo.nef`). Only existing files are returned.
pub fn infer_image_path(sidecar: &Path) -> Option<PathBuf> {
    let name = sidecar.file_name()?.to_str()?;
    let lower = name.to_ascii_lowercase();
    let base = if lower.ends_with(".xmp") {
        &name[..name.len() - 4]
    } else {
        sidecar.file_stem()?.to_str()?
    };
    let dir = sidecar.parent().unwrap_or_else(|| Path::new(""));

    let (stem, ext) = base.rsplit_once('.')?;
    if !RAW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }

    let direct = dir.join(base);
    if direct.is_file() {
        return Some(direct);
    }

    // <stem>_<n>.<ext> → <stem>.<ext>
    let (original, counter) = stem.rsplit_once('_')?;
    if original.is_empty() || counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let fallback = dir.join(format!("{original}.{ext}"));
    fallback.is_file().then_some(fallback)
}
