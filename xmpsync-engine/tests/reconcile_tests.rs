//! End-to-end scan → decide → execute tests against real temp trees.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xmpsync_core::ports::{ExternalEditor, PreviewRenderer, PreviewRequest, PreviewStatus};
use xmpsync_core::{ConfigError, Decision, EngineConfig, Side, StepClass};
use xmpsync_engine::{
    backup_path_for, EngineError, FileOutcome, ReconcileSession,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sidecar(steps: &[(&str, u32, &str)]) -> String {
    let items: String = steps
        .iter()
        .enumerate()
        .map(|(i, (op, instance, params))| {
            format!(
                r#"
     <rdf:li darktable:num="{i}" darktable:operation="{op}" darktable:enabled="1"
       darktable:modversion="7" darktable:params="{params}" darktable:multi_priority="{instance}"/>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="XMP Core 4.4.0-Exiv2">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:darktable="http://darktable.sf.net/"
    darktable:xmp_version="5">
   <darktable:history>
    <rdf:Seq>{items}
    </rdf:Seq>
   </darktable:history>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
"#
    )
}

struct Trees {
    _tmp: TempDir,
    archive: PathBuf,
    session: PathBuf,
}

impl Trees {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let archive = tmp.path().join("archive");
        let session = tmp.path().join("session");
        fs::create_dir_all(&archive).expect("archive");
        fs::create_dir_all(&session).expect("session");
        Self {
            _tmp: tmp,
            archive,
            session,
        }
    }

    fn write(&self, side: Side, rel: &str, content: &str) {
        let root = match side {
            Side::Archive => &self.archive,
            Side::Session => &self.session,
        };
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write sidecar");
    }

    fn read(&self, side: Side, rel: &str) -> String {
        let root = match side {
            Side::Archive => &self.archive,
            Side::Session => &self.session,
        };
        fs::read_to_string(root.join(rel)).expect("read sidecar")
    }

    fn open(&self) -> ReconcileSession {
        init_logging();
        ReconcileSession::open(&self.archive, &self.session, config()).expect("open session")
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        workers: Some(2),
        ..EngineConfig::default()
    }
}

fn p(rel: &str) -> PathBuf {
    PathBuf::from(rel)
}

/// a.nef.xmp: session adds sharpen. b.nef.xmp: identical. c.nef.xmp: exposure changed.
fn three_file_trees() -> Trees {
    let trees = Trees::new();
    let base = sidecar(&[("exposure", 0, "aa"), ("crop", 0, "bb")]);
    trees.write(Side::Archive, "2024/a.nef.xmp", &base);
    trees.write(
        Side::Session,
        "2024/a.nef.xmp",
        &sidecar(&[("exposure", 0, "aa"), ("crop", 0, "bb"), ("sharpen", 0, "cc")]),
    );
    trees.write(Side::Archive, "2024/b.nef.xmp", &base);
    trees.write(Side::Session, "2024/b.nef.xmp", &base);
    trees.write(Side::Archive, "2024/c.nef.xmp", &base);
    trees.write(
        Side::Session,
        "2024/c.nef.xmp",
        &sidecar(&[("exposure", 0, "ff"), ("crop", 0, "bb")]),
    );
    trees.write(Side::Archive, "archive_only.nef.xmp", &base);
    trees
}

// ---------------------------------------------------------------------------
// Scan + diff
// ---------------------------------------------------------------------------

#[test]
fn scan_classifies_every_file() {
    let trees = three_file_trees();
    let session = trees.open();

    let rels: Vec<_> = session
        .matched()
        .iter()
        .map(|f| f.relative_path.clone())
        .collect();
    assert_eq!(
        rels,
        vec![p("2024/a.nef.xmp"), p("2024/b.nef.xmp"), p("2024/c.nef.xmp")]
    );
    assert_eq!(session.scan_result().archive_only, vec![p("archive_only.nef.xmp")]);

    let a = session.diff(&p("2024/a.nef.xmp")).expect("diff a");
    assert_eq!(a.len(), 3);
    assert_eq!(a[2].primary_class(), StepClass::AddedInSession);
    assert!(a[..2].iter().all(|e| e.is_identical()));

    let b = session.file(&p("2024/b.nef.xmp")).expect("b");
    assert!(b.byte_identical);
    assert_eq!(b.has_differences(), Some(false));

    let c = session.diff(&p("2024/c.nef.xmp")).expect("diff c");
    assert_eq!(c[0].differing_fields(), ["params".to_string()]);

    let counts = session.decision_counts();
    assert_eq!(counts.undecided, 3);
    assert_eq!(counts.undecided_with_differences, 2);
}

#[test]
fn raw_diff_shows_added_line() {
    let trees = three_file_trees();
    let session = trees.open();
    let raw = session.raw_diff(&p("2024/a.nef.xmp")).expect("raw diff");
    assert!(raw.contains("--- a/2024/a.nef.xmp"));
    assert!(raw.contains("+     <rdf:li darktable:num=\"2\" darktable:operation=\"sharpen\""));
    assert!(session.raw_diff(&p("2024/b.nef.xmp")).expect("raw").is_empty());
}

#[test]
fn no_matches_is_fatal() {
    init_logging();
    let trees = Trees::new();
    trees.write(Side::Archive, "x.nef.xmp", &sidecar(&[]));
    let err = ReconcileSession::open(&trees.archive, &trees.session, config()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::NoMatchedFiles {
            archive_only: 1,
            session_only: 0
        }
    ));
}

#[test]
fn identical_roots_are_rejected() {
    init_logging();
    let trees = Trees::new();
    let err = ReconcileSession::open(&trees.archive, &trees.archive, config()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Config(ConfigError::IdenticalRoots { .. })
    ));
}

#[test]
fn unknown_path_is_an_error() {
    let trees = three_file_trees();
    let mut session = trees.open();
    assert!(matches!(
        session.set_decision(&p("nope.xmp"), Decision::KeepArchive),
        Err(EngineError::Decision(_))
    ));
    assert!(session.diff(&p("archive_only.nef.xmp")).is_err());
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

#[test]
fn keep_archive_copies_and_keeps_backup_of_old_session() {
    let trees = three_file_trees();
    let mut session = trees.open();
    let before = trees.read(Side::Session, "2024/a.nef.xmp");

    session
        .set_decision(&p("2024/a.nef.xmp"), Decision::KeepArchive)
        .expect("decide");
    let report = session.execute(false, true);

    let entry = report.file(&p("2024/a.nef.xmp")).expect("entry");
    let backup = backup_path_for(&trees.session.join("2024/a.nef.xmp"));
    assert_eq!(
        entry.outcome,
        FileOutcome::Succeeded {
            backup: Some(backup.clone())
        }
    );
    assert_eq!(
        trees.read(Side::Session, "2024/a.nef.xmp"),
        trees.read(Side::Archive, "2024/a.nef.xmp")
    );
    assert_eq!(fs::read_to_string(backup).expect("backup"), before);
    assert_eq!(report.counts().skipped, 2);
}

#[test]
fn keep_session_overwrites_archive() {
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("2024/c.nef.xmp"), Decision::KeepSession)
        .expect("decide");
    let report = session.execute(false, false);
    assert_eq!(report.counts().succeeded, 1);
    assert_eq!(
        trees.read(Side::Archive, "2024/c.nef.xmp"),
        trees.read(Side::Session, "2024/c.nef.xmp")
    );
    assert!(!backup_path_for(&trees.archive.join("2024/c.nef.xmp")).exists());
}

#[test]
fn dry_run_touches_nothing() {
    let trees = three_file_trees();
    let mut session = trees.open();
    session.set_all(Decision::KeepArchive, true);

    let session_before = trees.read(Side::Session, "2024/a.nef.xmp");
    let report = session.execute(true, true);
    assert!(report.dry_run);
    assert_eq!(report.counts().succeeded, 2);
    assert!(report
        .files
        .iter()
        .all(|f| matches!(f.outcome, FileOutcome::WouldSucceed | FileOutcome::Skipped)));
    assert_eq!(trees.read(Side::Session, "2024/a.nef.xmp"), session_before);

    let leftovers: Vec<_> = fs::read_dir(trees.session.join("2024"))
        .expect("read dir")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(leftovers.len(), 3, "only the original sidecars: {leftovers:?}");

    let planned: Vec<_> = session.plan(true).into_iter().map(|(_, op)| op).collect();
    let executed: Vec<_> = report.operations().cloned().collect();
    assert_eq!(planned, executed);
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("2024/a.nef.xmp"), Decision::KeepArchive)
        .expect("decide a");
    session
        .set_decision(&p("2024/c.nef.xmp"), Decision::KeepArchive)
        .expect("decide c");

    // Source vanishes after the scan.
    fs::remove_file(trees.archive.join("2024/a.nef.xmp")).expect("remove");
    let c_archive = trees.read(Side::Archive, "2024/c.nef.xmp");

    let report = session.execute(false, true);
    let a = report.file(&p("2024/a.nef.xmp")).expect("a");
    let c = report.file(&p("2024/c.nef.xmp")).expect("c");
    assert!(matches!(&a.outcome, FileOutcome::Failed { reason } if reason.contains("does not exist")));
    assert!(matches!(c.outcome, FileOutcome::Succeeded { .. }));
    assert_eq!(trees.read(Side::Session, "2024/c.nef.xmp"), c_archive);
}

// ---------------------------------------------------------------------------
// Rescan
// ---------------------------------------------------------------------------

#[test]
fn rescan_invalidates_changed_files_only() {
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("2024/a.nef.xmp"), Decision::KeepArchive)
        .expect("decide a");
    session
        .set_decision(&p("2024/c.nef.xmp"), Decision::KeepSession)
        .expect("decide c");

    trees.write(
        Side::Session,
        "2024/c.nef.xmp",
        &sidecar(&[("exposure", 0, "00"), ("crop", 0, "bb")]),
    );
    trees.write(Side::Archive, "2024/new.nef.xmp", &sidecar(&[]));
    trees.write(Side::Session, "2024/new.nef.xmp", &sidecar(&[]));

    let summary = session.rescan().expect("rescan");
    assert_eq!(summary.invalidated, vec![p("2024/c.nef.xmp")]);
    assert_eq!(summary.added, vec![p("2024/new.nef.xmp")]);
    assert!(summary.removed.is_empty());

    assert_eq!(
        session.get_decision(&p("2024/a.nef.xmp")).expect("a"),
        Decision::KeepArchive
    );
    assert_eq!(
        session.get_decision(&p("2024/c.nef.xmp")).expect("c"),
        Decision::NoAction
    );
    assert_eq!(session.decision_counts().invalidated, 1);
}

#[test]
fn cancel_abandons_one_batch_then_clears() {
    init_logging();
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("2024/a.nef.xmp"), Decision::KeepSession)
        .expect("decide a");

    session.cancel_token().cancel();
    let report = session.execute(true, true);
    assert!(report.cancelled);
    assert_eq!(report.counts().succeeded, 0);
    assert!(!session.cancel_token().is_cancelled());

    let report = session.execute(true, true);
    assert!(!report.cancelled);
    assert_eq!(report.counts().succeeded, 1);
}

#[test]
fn cancelled_rescan_keeps_scan_and_decisions() {
    init_logging();
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("2024/a.nef.xmp"), Decision::KeepSession)
        .expect("decide a");
    session
        .set_decision(&p("2024/b.nef.xmp"), Decision::KeepArchive)
        .expect("decide b");

    session.cancel_token().cancel();
    let summary = session.rescan().expect("cancelled rescan");
    assert!(summary.cancelled);
    assert!(summary.removed.is_empty());
    assert!(summary.invalidated.is_empty());
    assert_eq!(session.matched().len(), 3);
    assert_eq!(
        session.get_decision(&p("2024/a.nef.xmp")).expect("a"),
        Decision::KeepSession
    );

    let summary = session.rescan().expect("rescan");
    assert!(!summary.cancelled);
    assert!(summary.removed.is_empty());
    assert_eq!(session.matched().len(), 3);
    assert_eq!(
        session.get_decision(&p("2024/b.nef.xmp")).expect("b"),
        Decision::KeepArchive
    );
}

#[test]
fn dot_prefixed_paths_resolve_like_plain_ones() {
    let trees = three_file_trees();
    let mut session = trees.open();
    session
        .set_decision(&p("./2024/a.nef.xmp"), Decision::KeepArchive)
        .expect("decide");
    assert_eq!(
        session.get_decision(&p("2024/a.nef.xmp")).expect("get"),
        Decision::KeepArchive
    );
    assert!(session.diff(&p("./2024/a.nef.xmp")).is_ok());
    assert!(session.file(&p("./2024/a.nef.xmp")).is_ok());
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

struct RecordingRenderer;

impl PreviewRenderer for RecordingRenderer {
    fn request_preview(&self, request: &PreviewRequest) -> PreviewStatus {
        match &request.image_path {
            Some(_) => PreviewStatus::Queued,
            None => PreviewStatus::Failed(format!("no image for {}", request.sidecar_path.display())),
        }
    }
}

struct ChooseSession {
    seen: Vec<(PathBuf, PathBuf)>,
}

impl ExternalEditor for ChooseSession {
    fn reconcile(&mut self, archive: &Path, session: &Path) -> Option<Decision> {
        self.seen.push((archive.to_path_buf(), session.to_path_buf()));
        Some(Decision::KeepSession)
    }
}

#[test]
fn preview_uses_image_next_to_sidecar() {
    let trees = three_file_trees();
    fs::write(trees.session.join("2024/a.nef"), b"raw").expect("image");
    let session = trees.open();
    let renderer = RecordingRenderer;

    let status = session
        .preview(&p("2024/a.nef.xmp"), Side::Session, &renderer, 512)
        .expect("preview");
    assert_eq!(status, PreviewStatus::Queued);

    let status = session
        .preview(&p("2024/a.nef.xmp"), Side::Archive, &renderer, 512)
        .expect("preview");
    assert!(matches!(status, PreviewStatus::Failed(_)));
}

#[test]
fn editor_outcome_is_recorded() {
    let trees = three_file_trees();
    let mut session = trees.open();
    let mut editor = ChooseSession { seen: Vec::new() };
    let outcome = session
        .resolve_with_editor(&p("2024/c.nef.xmp"), &mut editor)
        .expect("editor");
    assert_eq!(outcome, Some(Decision::KeepSession));
    assert_eq!(editor.seen.len(), 1);
    assert_eq!(
        session.get_decision(&p("2024/c.nef.xmp")).expect("c"),
        Decision::KeepSession
    );
}
