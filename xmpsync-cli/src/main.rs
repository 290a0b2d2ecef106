//! xmpsync: reconcile darktable sidecars between an archive and a session copy.
//!
//! # Usage
//!
//! ```text
//! xmpsync [--archive <dir>] [--session <dir>] [--workers <n>] [--config <file>] <command>
//! xmpsync scan [--all] [--json]
//! xmpsync diff <path> [--raw] [--json]
//! xmpsync apply [--keep-archive <path>...] [--keep-session <path>...] [--keep-both <path>...]
//!               [--all-archive | --all-session] [--dry-run] [--no-backup]
//!               [--overwrite-foreign-backups] [--json]
//! xmpsync config show
//! xmpsync config set-roots <archive> <session>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs, config::ConfigCommand, diff::DiffArgs, scan::ScanArgs, GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "xmpsync",
    version,
    about = "Compare and reconcile darktable XMP sidecars between two directory trees",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan both trees and list sidecars whose edit histories differ.
    Scan(ScanArgs),

    /// Show the step-level diff for one sidecar.
    Diff(DiffArgs),

    /// Copy sidecars according to per-file decisions.
    Apply(ApplyArgs),

    /// Show or edit the remembered settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Commands::Scan(args) => args.run(&cli.global),
        Commands::Diff(args) => args.run(&cli.global),
        Commands::Apply(args) => args.run(&cli.global),
        Commands::Config { command } => commands::config::run(command, &cli.global),
    }
}

/// Log to stderr so command output on stdout stays machine-readable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
