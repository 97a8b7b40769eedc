//! Shared configuration for the spindle extension host.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then the
//! first configuration file found, then `SPINDLE_*` environment variables,
//! then command-line flags. Every field has a matching environment variable
//! and flag, for example `SPINDLE_SANDBOX_TIMEOUT_MS` and
//! `--sandbox-timeout-ms`. The file is named by `--config-path` or
//! `SPINDLE_CONFIG_PATH`, or discovered as `spindle.toml` in the platform
//! configuration directory.
//!
//! ```toml
//! log_filter = "spindle_sandbox=debug,info"
//! log_format = "json"
//! sandbox_timeout_ms = 5000
//! sandbox_workers = 2
//! packages_root = "/var/lib/spindle/packages"
//! ```

mod defaults;
mod logging;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    CONFIG_PATH_ENV, DEFAULT_LOG_FILTER, DEFAULT_MAX_STACK_BYTES, DEFAULT_MEMORY_LIMIT_BYTES,
    DEFAULT_TIMEOUT_MS, DEFAULT_WORKERS, default_capture_console, default_log_filter,
    default_log_filter_string, default_log_format, default_max_stack_bytes,
    default_memory_limit_bytes, default_packages_root, default_timeout_ms, default_workers,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A layer could not be read or merged.
    #[error(transparent)]
    Load(#[from] Arc<OrthoError>),

    /// A value was syntactically valid but semantically rejected.
    #[error("invalid configuration value for '{field}': {message}")]
    Invalid {
        /// Field name as written in the configuration file.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(
    prefix = "SPINDLE",
    discovery(
        app_name = "spindle",
        env_var = "SPINDLE_CONFIG_PATH",
        config_file_name = "spindle.toml",
        dotfile_name = ".spindle.toml",
        project_file_name = ".spindle.toml",
        config_cli_long = "config-path",
        config_cli_visible = true,
    )
)]
pub struct Config {
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Execution budget per worker request, in milliseconds.
    #[ortho_config(default = default_timeout_ms())]
    #[serde(default = "default_timeout_ms")]
    pub sandbox_timeout_ms: u64,
    /// Engine heap limit in bytes.
    #[ortho_config(default = default_memory_limit_bytes())]
    #[serde(default = "default_memory_limit_bytes")]
    pub sandbox_memory_limit_bytes: usize,
    /// Engine stack limit in bytes.
    #[ortho_config(default = default_max_stack_bytes())]
    #[serde(default = "default_max_stack_bytes")]
    pub sandbox_max_stack_bytes: usize,
    /// Number of execution workers in the pool.
    #[ortho_config(default = default_workers())]
    #[serde(default = "default_workers")]
    pub sandbox_workers: usize,
    /// Whether extension console output is captured for debug logs.
    #[ortho_config(default = default_capture_console())]
    #[serde(default = "default_capture_console")]
    pub sandbox_capture_console: bool,
    /// Directory holding `<name>@<version>` or `<name>` package folders.
    #[ortho_config(default = default_packages_root())]
    #[serde(default = "default_packages_root")]
    pub packages_root: PathBuf,
    /// Directory for transient entry modules. Defaults to the system
    /// temporary directory.
    #[serde(default)]
    pub packages_staging_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            sandbox_timeout_ms: default_timeout_ms(),
            sandbox_memory_limit_bytes: default_memory_limit_bytes(),
            sandbox_max_stack_bytes: default_max_stack_bytes(),
            sandbox_workers: default_workers(),
            sandbox_capture_console: default_capture_console(),
            packages_root: default_packages_root(),
            packages_staging_dir: None,
        }
    }
}

impl Config {
    /// Loads every layer from `args` and the process environment, then
    /// validates the merged result.
    ///
    /// `args` starts with the program name; the remaining items may only be
    /// configuration flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or merged
    /// and [`ConfigError::Invalid`] when the merged values are rejected.
    pub fn resolve<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let config = Self::load_from_iter(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero timeout, zero workers, or
    /// an empty log filter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sandbox_timeout_ms",
                message: String::from("must be greater than zero"),
            });
        }
        if self.sandbox_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "sandbox_workers",
                message: String::from("at least one worker is required"),
            });
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_filter",
                message: String::from("must not be empty"),
            });
        }
        Ok(())
    }

    /// Returns the configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the execution timeout as a [`Duration`].
    #[must_use]
    pub const fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }

    /// Returns the package root.
    #[must_use]
    pub fn packages_root(&self) -> &Path {
        &self.packages_root
    }
}
