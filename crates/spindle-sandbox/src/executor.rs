//! The seam between extension orchestration and code execution.

use async_trait::async_trait;
use serde_json::Value;

use crate::bundler::DependencyManifest;
use crate::error::SandboxError;
use crate::protocol::{EvaluationReport, Output, WorkerRequest};

/// Everything needed to evaluate one extension.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    extension_id: String,
    code: String,
    dependencies: DependencyManifest,
    metadata: Value,
}

impl EvaluationRequest {
    /// Creates a request with no dependencies and empty metadata.
    #[must_use]
    pub fn new(extension_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            code: code.into(),
            dependencies: DependencyManifest::new(),
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the dependency manifest.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: DependencyManifest) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the metadata object exposed to the extension as `extension`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the extension id.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Returns the extension source.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the declared dependencies.
    #[must_use]
    pub const fn dependencies(&self) -> &DependencyManifest {
        &self.dependencies
    }

    /// Returns the metadata object.
    #[must_use]
    pub const fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub(crate) fn into_wire(self) -> WorkerRequest {
        WorkerRequest::Evaluate {
            extension_id: self.extension_id,
            code: self.code,
            dependencies: (!self.dependencies.is_empty()).then_some(self.dependencies),
            metadata: Some(self.metadata),
        }
    }
}

/// Runs extension code somewhere isolated from the caller.
///
/// [`crate::Worker`] and [`crate::WorkerPool`] are the shipped
/// implementations. Orchestration code depends on this trait so tests can
/// substitute a stub.
#[async_trait]
pub trait ExtensionExecutor: Send + Sync {
    /// Evaluates extension source and reports its exported surface.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Dependency`], [`SandboxError::Evaluation`] or
    /// [`SandboxError::ExecutionTimeout`] when the extension cannot be
    /// loaded, and [`SandboxError::WorkerUnavailable`] when the worker is
    /// gone.
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<Output<EvaluationReport>, SandboxError>;

    /// Calls an exported function of a loaded extension.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::NotLoaded`] for unknown extensions,
    /// [`SandboxError::FunctionNotFound`] for unknown functions, and the
    /// evaluation and timeout errors raised by the call itself.
    async fn invoke(
        &self,
        extension_id: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Output<Value>, SandboxError>;

    /// Runs a hook handler registered by a loaded extension.
    ///
    /// # Errors
    ///
    /// Same as [`ExtensionExecutor::invoke`].
    async fn invoke_hook(
        &self,
        extension_id: &str,
        hook_type: &str,
        name: &str,
        context: Value,
    ) -> Result<Output<Value>, SandboxError>;

    /// Drops a loaded extension. Unknown ids are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::WorkerUnavailable`] when the worker is gone.
    async fn unload(&self, extension_id: &str) -> Result<(), SandboxError>;
}
