use std::env;
use std::path::PathBuf;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default execution budget for a single worker request, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default engine heap limit applied to every worker runtime.
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Default maximum engine stack size.
pub const DEFAULT_MAX_STACK_BYTES: usize = 1024 * 1024;

/// Default number of execution workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "SPINDLE_CONFIG_PATH";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Default execution budget in milliseconds.
#[must_use]
pub const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Default engine heap limit.
#[must_use]
pub const fn default_memory_limit_bytes() -> usize {
    DEFAULT_MEMORY_LIMIT_BYTES
}

/// Default engine stack limit.
#[must_use]
pub const fn default_max_stack_bytes() -> usize {
    DEFAULT_MAX_STACK_BYTES
}

/// Default worker count.
#[must_use]
pub const fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Console output is captured unless disabled.
#[must_use]
pub const fn default_capture_console() -> bool {
    true
}

/// Computes the directory extension packages are resolved from.
///
/// Prefers the platform data directory and falls back to the system
/// temporary directory when no data directory is known.
#[must_use]
pub fn default_packages_root() -> PathBuf {
    let mut base = dirs::data_dir().unwrap_or_else(env::temp_dir);
    base.push("spindle");
    base.push("packages");
    base
}
