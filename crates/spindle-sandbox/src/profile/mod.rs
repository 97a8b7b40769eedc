//! Resource limits applied to extension realms.

use std::time::Duration;

/// Default per-request execution budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default engine heap limit (64 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;
/// Default engine stack limit (1 MiB).
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 1024;

/// Console capture strategy for extension realms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConsolePolicy {
    /// Record `console.*` lines for extensions whose metadata enables debug.
    #[default]
    Capture,
    /// Forward console output to tracing only.
    Discard,
}

impl ConsolePolicy {
    /// Returns `true` when console lines may be captured.
    #[must_use]
    pub const fn captures(self) -> bool {
        matches!(self, Self::Capture)
    }
}

/// Declarative description of the limits an execution worker enforces.
///
/// The profile defaults to a 30 second budget, a 64 MiB heap and a 1 MiB
/// stack. Every request a worker serves is bounded by the same profile.
///
/// ```
/// use std::time::Duration;
/// use spindle_sandbox::SandboxProfile;
///
/// let profile = SandboxProfile::new()
///     .with_timeout(Duration::from_millis(500))
///     .discard_console();
/// assert_eq!(profile.timeout_ms(), 500);
/// assert!(!profile.console_policy().captures());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProfile {
    timeout: Duration,
    memory_limit: usize,
    max_stack_size: usize,
    console: ConsolePolicy,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxProfile {
    /// Creates a profile with the default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            console: ConsolePolicy::Capture,
        }
    }

    /// Sets the per-request execution budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the engine heap limit in bytes.
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the engine stack limit in bytes.
    #[must_use]
    pub const fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = bytes;
        self
    }

    /// Stops capturing console output into debug logs.
    #[must_use]
    pub const fn discard_console(mut self) -> Self {
        self.console = ConsolePolicy::Discard;
        self
    }

    /// Returns the per-request execution budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the execution budget in whole milliseconds, saturating.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the engine heap limit in bytes.
    #[must_use]
    pub const fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Returns the engine stack limit in bytes.
    #[must_use]
    pub const fn max_stack_size(&self) -> usize {
        self.max_stack_size
    }

    /// Returns the console capture strategy.
    #[must_use]
    pub const fn console_policy(&self) -> ConsolePolicy {
        self.console
    }
}
