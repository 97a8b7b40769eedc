//! Domain errors raised while loading and running extensions.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. Sandbox failures are carried
//! unchanged so their typed kind survives up to the host.

use std::sync::Arc;

use spindle_sandbox::SandboxError;
use thiserror::Error;

/// Errors arising from extension lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    /// Bundling, evaluation or invocation failed inside the sandbox.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// No loaded extension answers to the given id or namespace.
    #[error("extension '{name}' is not loaded")]
    NotLoaded {
        /// Extension id or namespace that was looked up.
        name: String,
    },

    /// Another extension already owns the namespace.
    #[error("namespace '{namespace}' is already used by extension '{existing}'; '{incoming}' was not loaded")]
    NamespaceConflict {
        /// The contested namespace.
        namespace: String,
        /// Id of the extension holding the namespace.
        existing: String,
        /// Id of the extension that was refused.
        incoming: String,
    },

    /// The extension exists in the store but is switched off.
    #[error("extension '{id}' is disabled")]
    Disabled {
        /// Extension id.
        id: String,
    },

    /// The storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExtensionError {
    /// Returns `true` when the underlying failure was a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Sandbox(error) if error.is_timeout())
    }
}

/// A single hook handler failed. Siblings are unaffected.
#[derive(Debug, Clone, Error)]
#[error("hook '{hook_type}' handler '{name}' of '{owner}' failed: {message}")]
pub struct HookHandlerError {
    hook_type: String,
    name: String,
    owner: String,
    message: String,
    #[source]
    source: Option<SandboxError>,
}

impl HookHandlerError {
    /// Creates an error with a plain message.
    #[must_use]
    pub fn new(
        hook_type: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            hook_type: hook_type.into(),
            name: name.into(),
            owner: owner.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error caused by a sandbox failure.
    #[must_use]
    pub fn sandbox(
        hook_type: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        source: SandboxError,
    ) -> Self {
        Self {
            hook_type: hook_type.into(),
            name: name.into(),
            owner: owner.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Returns the lifecycle event name.
    #[must_use]
    pub fn hook_type(&self) -> &str {
        &self.hook_type
    }

    /// Returns the handler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id of the extension that registered the handler.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by an [`ExtensionStore`](crate::store::ExtensionStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record with the given id exists.
    #[error("extension '{id}' not found in store")]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// A record could not be read or written.
    #[error("extension store failure: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },
}

impl StoreError {
    /// Wraps an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }
}
