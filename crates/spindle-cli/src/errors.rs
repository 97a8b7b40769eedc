//! Error type for the CLI runtime.

use std::io;
use std::path::PathBuf;

use spindle_config::ConfigError;
use spindle_extensions::ExtensionError;
use spindle_sandbox::SandboxError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to read extension source '{path}': {source}")]
    ReadSource { path: PathBuf, source: io::Error },
    #[error("cannot derive an extension id from '{0}'; pass --id")]
    MissingId(PathBuf),
    #[error("invalid dependency '{0}': expected NAME@VERSION")]
    InvalidDependency(String),
    #[error("invalid JSON for {what}: {source}")]
    InvalidJson {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to start execution workers: {0}")]
    Workers(#[source] SandboxError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("{failed} of {total} extensions failed to load")]
    PartialLoad { failed: usize, total: usize },
    #[error("failed to serialise output: {0}")]
    Serialise(serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}

impl AppError {
    /// Exit status reported for this error.
    pub(crate) const fn exit_code(&self) -> u8 {
        match self {
            Self::CliUsage(_) => 2,
            _ => 1,
        }
    }
}
