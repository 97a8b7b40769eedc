//! Domain errors raised by the execution worker and dependency bundler.
//!
//! Errors cross the worker boundary as JSON, so every variant is `Clone` and
//! carries only owned, serialisable context. I/O failures are wrapped in
//! `Arc` to keep the enums cheap to clone when a shared in-flight bundle
//! future hands the same failure to several waiters.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::{DebugLogEntry, ErrorKind};

/// A declared dependency could not be located or loaded.
///
/// Resolution of a manifest is atomic: one failing package aborts the
/// whole manifest, and this error names the offending `name@version`.
#[derive(Debug, Clone, Error)]
#[error("failed to resolve dependency '{dependency}': {message}")]
pub struct DependencyResolutionError {
    dependency: String,
    message: String,
    #[source]
    source: Option<Arc<std::io::Error>>,
}

impl DependencyResolutionError {
    /// Creates an error for the given `name@version` key.
    #[must_use]
    pub fn new(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error caused by an I/O failure.
    #[must_use]
    pub fn io(
        dependency: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns the offending `name@version` key.
    #[must_use]
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Returns the failure description without the dependency prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors arising from evaluating or invoking extension code.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// A declared dependency could not be resolved.
    #[error(transparent)]
    Dependency(#[from] DependencyResolutionError),

    /// The request exceeded its execution budget.
    #[error("extension '{extension}' timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        /// Extension identifier.
        extension: String,
        /// Configured budget in milliseconds.
        timeout_ms: u64,
        /// Console lines captured before the deadline passed.
        logs: Vec<DebugLogEntry>,
    },

    /// Extension code raised a syntax or runtime error.
    #[error("extension '{extension}' raised an error: {message}")]
    Evaluation {
        /// Extension identifier.
        extension: String,
        /// Message reported by the engine.
        message: String,
        /// Stack trace, when the engine captured one.
        stack: Option<String>,
        /// Console lines captured before the error was raised.
        logs: Vec<DebugLogEntry>,
    },

    /// The extension has no realm in the addressed worker.
    #[error("extension '{extension}' is not loaded")]
    NotLoaded {
        /// Extension identifier.
        extension: String,
    },

    /// The extension does not export the requested function or hook.
    #[error("extension '{extension}' has no callable '{function}'")]
    FunctionNotFound {
        /// Extension identifier.
        extension: String,
        /// Function or hook handler name.
        function: String,
    },

    /// The worker thread has stopped or never started.
    #[error("worker {worker} is unavailable: {message}")]
    WorkerUnavailable {
        /// Worker index within its pool.
        worker: usize,
        /// Description of the failure.
        message: String,
    },

    /// A message violated the orchestrator/worker wire contract.
    #[error("worker protocol violation: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The embedded engine failed outside extension code.
    #[error("engine failure: {message}")]
    Engine {
        /// Description of the failure.
        message: String,
    },
}

impl SandboxError {
    /// Returns the wire discriminator used to rebuild this error on the
    /// other side of the worker boundary.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Dependency(_) => ErrorKind::Dependency,
            Self::ExecutionTimeout { .. } => ErrorKind::Timeout,
            Self::Evaluation { .. } => ErrorKind::Evaluation,
            Self::NotLoaded { .. } => ErrorKind::NotLoaded,
            Self::FunctionNotFound { .. } => ErrorKind::FunctionNotFound,
            Self::WorkerUnavailable { .. } | Self::Protocol { .. } | Self::Engine { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns `true` when the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ExecutionTimeout { .. })
    }

    /// Returns the engine stack trace carried by evaluation errors.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Evaluation { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Returns the console lines an extension wrote before failing.
    ///
    /// Only failures raised while extension code ran carry lines, and only
    /// when the request captured console output.
    #[must_use]
    pub fn logs(&self) -> &[DebugLogEntry] {
        match self {
            Self::ExecutionTimeout { logs, .. } | Self::Evaluation { logs, .. } => logs,
            _ => &[],
        }
    }

    /// Attaches captured console lines to a timeout or evaluation failure.
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_logs(mut self, captured: Vec<DebugLogEntry>) -> Self {
        if let Self::ExecutionTimeout { logs, .. } | Self::Evaluation { logs, .. } = &mut self {
            *logs = captured;
        }
        self
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}
