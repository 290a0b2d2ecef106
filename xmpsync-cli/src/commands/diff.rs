//! `xmpsync diff`: step-level (or raw text) diff for one sidecar.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use xmpsync_core::{StepClass, StepDiffEntry};

use super::GlobalArgs;

/// Arguments for `xmpsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Sidecar path relative to both roots.
    pub path: PathBuf,

    /// Show a unified text diff of the two documents instead.
    #[arg(long, conflicts_with = "json")]
    pub raw: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "archive #")]
    archive_index: String,
    #[tabled(rename = "session #")]
    session_index: String,
    #[tabled(rename = "fields")]
    fields: String,
}

impl DiffArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = global.open_session()?;

        if self.raw {
            let text = session
                .raw_diff(&self.path)
                .with_context(|| format!("cannot diff '{}'", self.path.display()))?;
            if text.is_empty() {
                println!("no textual differences in {}", self.path.display());
            } else {
                print!("{text}");
            }
            return Ok(());
        }

        let entries = session
            .diff(&self.path)
            .with_context(|| format!("cannot diff '{}'", self.path.display()))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        let file = session.file(&self.path)?;
        if file.byte_identical {
            println!("{} {}", "✓".green(), "byte-identical".green());
        }
        if file.metadata_differs {
            println!("{}", "tags or document attributes differ".yellow());
        }

        let rows: Vec<StepRow> = entries.iter().map(row).collect();
        if rows.is_empty() {
            println!("no history steps on either side");
            return Ok(());
        }
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(entry: &StepDiffEntry) -> StepRow {
    let class = entry.primary_class();
    let label = class.to_string();
    let change = match class {
        StepClass::AddedInSession => label.green().to_string(),
        StepClass::RemovedFromArchive => label.red().to_string(),
        StepClass::ParametersDiffer | StepClass::OrderDiffers => label.yellow().to_string(),
        StepClass::Identical => label.dimmed().to_string(),
    };
    let mut fields = entry.differing_fields().join(", ");
    if class == StepClass::ParametersDiffer && entry.has(StepClass::OrderDiffers) {
        fields.push_str(" (also reordered)");
    }
    StepRow {
        step: entry.key.to_string(),
        change,
        archive_index: index(entry.archive_index),
        session_index: index(entry.session_index),
        fields,
    }
}

fn index(value: Option<u32>) -> String {
    value.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string())
}
