//! `xmpsync scan`: list matched sidecars and how their histories differ.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use xmpsync_core::MatchedFile;
use xmpsync_engine::{DiffSummary, ScanResult};

use super::GlobalArgs;

/// Arguments for `xmpsync scan`.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Include files with no differences.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = global.open_session()?;
        let scan = session.scan_result();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&to_json(scan))?);
            return Ok(());
        }

        print_table(scan, self.all);
        Ok(())
    }
}

#[derive(Serialize)]
struct ScanJson {
    archive_root: PathBuf,
    session_root: PathBuf,
    files: Vec<FileJson>,
    archive_only: Vec<PathBuf>,
    session_only: Vec<PathBuf>,
    warnings: Vec<WarningJson>,
}

#[derive(Serialize)]
struct FileJson {
    path: PathBuf,
    differs: bool,
    byte_identical: bool,
    metadata_differs: bool,
    session_unedited: bool,
    steps: DiffSummary,
}

#[derive(Serialize)]
struct WarningJson {
    path: PathBuf,
    message: String,
}

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "sidecar")]
    path: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "+")]
    added: usize,
    #[tabled(rename = "-")]
    removed: usize,
    #[tabled(rename = "params")]
    parameters: usize,
    #[tabled(rename = "order")]
    order: usize,
    #[tabled(rename = "notes")]
    notes: String,
}

fn summary(file: &MatchedFile) -> DiffSummary {
    file.diff
        .as_deref()
        .map(DiffSummary::of)
        .unwrap_or_default()
}

fn to_json(scan: &ScanResult) -> ScanJson {
    ScanJson {
        archive_root: scan.archive_root.clone(),
        session_root: scan.session_root.clone(),
        files: scan
            .matched
            .iter()
            .map(|f| FileJson {
                path: f.relative_path.clone(),
                differs: f.has_differences().unwrap_or(false),
                byte_identical: f.byte_identical,
                metadata_differs: f.metadata_differs,
                session_unedited: f.session_unedited,
                steps: summary(f),
            })
            .collect(),
        archive_only: scan.archive_only.clone(),
        session_only: scan.session_only.clone(),
        warnings: scan
            .warnings
            .iter()
            .map(|w| WarningJson {
                path: w.path.clone(),
                message: w.message.clone(),
            })
            .collect(),
    }
}

fn print_table(scan: &ScanResult, all: bool) {
    let differing = scan.with_differences().count();
    println!(
        "{} matched, {} with differences, {} archive-only, {} session-only",
        scan.matched.len(),
        differing,
        scan.archive_only.len(),
        scan.session_only.len()
    );

    let rows: Vec<ScanRow> = scan
        .matched
        .iter()
        .filter(|f| all || f.has_differences().unwrap_or(false))
        .map(|f| {
            let steps = summary(f);
            let differs = f.has_differences().unwrap_or(false);
            let mut notes = Vec::new();
            if f.metadata_differs {
                notes.push("metadata");
            }
            if f.session_unedited {
                notes.push("session unedited");
            }
            if !f.warnings.is_empty() {
                notes.push("warnings");
            }
            ScanRow {
                path: f.relative_path.display().to_string(),
                status: if differs {
                    "differs".yellow().to_string()
                } else {
                    "identical".green().to_string()
                },
                added: steps.added,
                removed: steps.removed,
                parameters: steps.parameters,
                order: steps.order,
                notes: notes.join(", "),
            }
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "✓ nothing to reconcile".green());
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    for warning in &scan.warnings {
        println!("{} {warning}", "warning:".yellow());
    }
    if scan.cancelled {
        println!("{}", "scan cancelled; results are partial".red());
    }
}
