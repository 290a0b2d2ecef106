//! `xmpsync apply`: record decisions and copy sidecars.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use xmpsync_core::Decision;
use xmpsync_engine::{ExecuteOptions, ExecutionReport, FileOutcome, ReconcileSession};

use super::GlobalArgs;

/// Arguments for `xmpsync apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Copy the archive version over the session version.
    #[arg(long, value_name = "PATH", num_args = 1..)]
    pub keep_archive: Vec<PathBuf>,

    /// Copy the session version over the archive version.
    #[arg(long, value_name = "PATH", num_args = 1..)]
    pub keep_session: Vec<PathBuf>,

    /// Leave both versions as they are.
    #[arg(long, value_name = "PATH", num_args = 1..)]
    pub keep_both: Vec<PathBuf>,

    /// Keep the archive version of every file that differs.
    #[arg(long, conflicts_with = "all_session")]
    pub all_archive: bool,

    /// Keep the session version of every file that differs.
    #[arg(long)]
    pub all_session: bool,

    /// Check every operation without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not back up overwritten sidecars.
    #[arg(long)]
    pub no_backup: bool,

    /// Replace backup slots that hold files this tool did not write.
    #[arg(long)]
    pub overwrite_foreign_backups: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let mut session = global.open_session()?;
        self.record_decisions(&mut session)?;

        let options = ExecuteOptions {
            dry_run: self.dry_run,
            backups_enabled: session.config().backups_enabled && !self.no_backup,
            overwrite_foreign_backups: session.config().overwrite_foreign_backups
                || self.overwrite_foreign_backups,
        };
        let report = session.execute_snapshot(&session.decisions().snapshot(), &options);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        let failed = report.counts().failed;
        if failed > 0 {
            bail!("{failed} file(s) could not be copied");
        }
        Ok(())
    }

    /// Bulk flags first, then per-path flags so they override.
    fn record_decisions(&self, session: &mut ReconcileSession) -> Result<()> {
        if self.all_archive {
            session.set_all(Decision::KeepArchive, true);
        }
        if self.all_session {
            session.set_all(Decision::KeepSession, true);
        }
        let per_path = [
            (&self.keep_archive, Decision::KeepArchive),
            (&self.keep_session, Decision::KeepSession),
            (&self.keep_both, Decision::KeepBoth),
        ];
        for (paths, decision) in per_path {
            for path in paths {
                session
                    .set_decision(path, decision)
                    .with_context(|| format!("cannot decide '{}'", path.display()))?;
            }
        }
        Ok(())
    }
}

fn print_report(report: &ExecutionReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let counts = report.counts();

    if counts.succeeded + counts.failed + counts.abandoned == 0 {
        println!("{prefix}✓ nothing to do");
        return;
    }

    for file in &report.files {
        let path = file.relative_path.display();
        match &file.outcome {
            FileOutcome::Skipped => {}
            FileOutcome::Succeeded { backup } => {
                println!("  ✎  {path} ({})", file.decision);
                if let Some(backup) = backup {
                    println!("     backup: {}", display_name(backup));
                }
            }
            FileOutcome::WouldSucceed => println!("  ~  {path} ({})", file.decision),
            FileOutcome::Failed { reason } | FileOutcome::WouldFail { reason } => {
                println!("  {}  {path}: {reason}", "✗".red())
            }
            FileOutcome::Abandoned => println!("  ·  {path} (cancelled)"),
        }
    }

    let summary = format!(
        "{prefix}{} copied, {} failed, {} skipped",
        counts.succeeded, counts.failed, counts.skipped
    );
    if counts.failed > 0 {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
