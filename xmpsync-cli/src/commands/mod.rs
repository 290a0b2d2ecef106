pub mod apply;
pub mod config;
pub mod diff;
pub mod scan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use xmpsync_core::{config as settings, SettingsFile};
use xmpsync_engine::ReconcileSession;

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Archive (authoritative) root. Defaults to the remembered root.
    #[arg(long, global = true, value_name = "DIR")]
    pub archive: Option<PathBuf>,

    /// Session (working copy) root. Defaults to the remembered root.
    #[arg(long, global = true, value_name = "DIR")]
    pub session: Option<PathBuf>,

    /// Worker threads for scanning and copying.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Settings file to use instead of `<config_dir>/xmpsync/config.yaml`.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn settings_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => settings::settings_path().context("could not locate the settings file"),
        }
    }

    pub fn load_settings(&self) -> Result<SettingsFile> {
        let path = self.settings_path()?;
        settings::load_at(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))
    }

    /// Load settings, apply command-line overrides, scan both trees.
    pub fn open_session(&self) -> Result<ReconcileSession> {
        let file = self.load_settings()?;
        let archive = self
            .archive
            .clone()
            .or(file.archive_root)
            .context("no archive root; pass --archive or run `xmpsync config set-roots`")?;
        let session = self
            .session
            .clone()
            .or(file.session_root)
            .context("no session root; pass --session or run `xmpsync config set-roots`")?;

        let mut engine = file.engine;
        if self.workers.is_some() {
            engine.workers = self.workers;
        }

        ReconcileSession::open(&archive, &session, engine).with_context(|| {
            format!(
                "scan failed for {} and {}",
                archive.display(),
                session.display()
            )
        })
    }
}
