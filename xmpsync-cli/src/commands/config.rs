//! `xmpsync config`: remembered roots and engine settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use xmpsync_core::config as settings;

use super::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the settings file location and its effective contents.
    Show,

    /// Remember the archive and session roots for later commands.
    SetRoots {
        /// Archive (authoritative) root.
        archive: PathBuf,
        /// Session (working copy) root.
        session: PathBuf,
    },
}

pub fn run(command: ConfigCommand, global: &GlobalArgs) -> Result<()> {
    let path = global.settings_path()?;
    match command {
        ConfigCommand::Show => {
            let current = global.load_settings()?;
            println!("# {}", path.display());
            print!("{}", serde_yaml::to_string(&current)?);
        }
        ConfigCommand::SetRoots { archive, session } => {
            let mut current = global.load_settings()?;
            current.archive_root = Some(absolute(archive)?);
            current.session_root = Some(absolute(session)?);
            settings::save_at(&path, &current)
                .with_context(|| format!("failed to save settings to {}", path.display()))?;
            println!("✓ roots saved to {}", path.display());
        }
    }
    Ok(())
}

/// Resolve relative roots against the current directory so the saved
/// settings work from anywhere.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}
