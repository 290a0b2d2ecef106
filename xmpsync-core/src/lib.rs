//! xmpsync core library: domain types, decision store, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: edit steps, histories, diff entries, matched files
//! - [`decisions`]: [`DecisionStore`] per-path state machine
//! - [`config`]: [`EngineConfig`] and the optional settings file
//! - [`ports`]: rendering and external-editor collaborator traits
//! - [`error`]: [`ConfigError`], [`DecisionError`]

pub mod config;
pub mod decisions;
pub mod error;
pub mod ports;
pub mod types;

pub use config::{EngineConfig, SettingsFile, BACKUP_SUFFIX};
pub use decisions::{DecisionCounts, DecisionEntry, DecisionSnapshot, DecisionStore};
pub use error::{ConfigError, DecisionError};
pub use types::{
    Decision, DiffFacet, EditStep, History, MatchedFile, PairFingerprint, ParamValue,
    Parameters, ScanWarning, Side, StepClass, StepDiffEntry, StepKey, SyncOperation,
};
