//! Error types for xmpsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. A scan refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A root directory does not exist.
    #[error("{side} root does not exist: {path}")]
    RootMissing { side: &'static str, path: PathBuf },

    /// A root exists but is not a directory.
    #[error("{side} root is not a directory: {path}")]
    RootNotDirectory { side: &'static str, path: PathBuf },

    /// Archive and session roots resolve to the same directory.
    #[error("archive and session roots are the same directory: {path}")]
    IdenticalRoots { path: PathBuf },

    /// One root lies inside the other, so the walk would see files twice.
    #[error("roots overlap: {inner} is inside {outer}")]
    NestedRoots { outer: PathBuf, inner: PathBuf },

    /// Root could not be resolved (permission denied, broken link, ...).
    #[error("cannot resolve {side} root {path}: {source}")]
    Resolve {
        side: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Worker pool size of zero was requested.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// The sidecar extension is empty.
    #[error("sidecar extension must not be empty")]
    EmptyExtension,

    /// Underlying I/O failure while loading or saving the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `dirs::config_dir()` returned `None`.
    #[error("cannot determine config directory; set $HOME or equivalent")]
    ConfigDirNotFound,
}

/// Errors from decision bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// The relative path is not a matched file in the current session.
    #[error("no matched file at {path}")]
    UnknownPath { path: PathBuf },
}
