//! Wire contract between the orchestrator and an execution worker.
//!
//! Every request is a [`WorkerMessage`] serialised to JSON and sent over the
//! worker's inbound channel together with a one-shot reply channel. The
//! worker answers with exactly one [`WorkerResponse`] carrying the same `id`.
//! No other state is shared between the two sides.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::bundler::DependencyManifest;
use crate::error::{DependencyResolutionError, SandboxError};

/// Request envelope sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    id: String,
    #[serde(flatten)]
    request: WorkerRequest,
}

impl WorkerMessage {
    /// Creates a message with the given correlation id.
    #[must_use]
    pub fn new(id: impl Into<String>, request: WorkerRequest) -> Self {
        Self {
            id: id.into(),
            request,
        }
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the request body.
    #[must_use]
    pub const fn request(&self) -> &WorkerRequest {
        &self.request
    }

    /// Consumes the message, returning its id and body.
    #[must_use]
    pub fn into_parts(self) -> (String, WorkerRequest) {
        (self.id, self.request)
    }
}

/// Operations understood by a worker, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    /// Evaluate extension source into a fresh realm.
    Evaluate {
        /// Extension identifier.
        extension_id: String,
        /// Extension source text.
        code: String,
        /// Declared third-party packages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dependencies: Option<DependencyManifest>,
        /// Read-only metadata exposed to the extension as `extension`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Call an exported function of a loaded extension.
    Invoke {
        /// Extension identifier.
        extension_id: String,
        /// Exported function name.
        function: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Run one hook handler registered by a loaded extension.
    InvokeHook {
        /// Extension identifier.
        extension_id: String,
        /// Lifecycle event name.
        hook_type: String,
        /// Handler name given at registration.
        name: String,
        /// Event context passed to the handler.
        #[serde(default)]
        context: Value,
    },
    /// Drop the extension's realm and handlers.
    Unload {
        /// Extension identifier.
        extension_id: String,
    },
}

impl WorkerRequest {
    /// Returns the extension the request addresses.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        match self {
            Self::Evaluate { extension_id, .. }
            | Self::Invoke { extension_id, .. }
            | Self::InvokeHook { extension_id, .. }
            | Self::Unload { extension_id } => extension_id,
        }
    }
}

/// Outcome discriminator of a [`WorkerResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseType {
    /// The request succeeded and `result` holds its value.
    Result,
    /// The request failed and `error` describes why.
    Error,
}

/// Typed error category carried across the serialisation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// A dependency could not be resolved.
    Dependency,
    /// The execution budget was exhausted.
    Timeout,
    /// Extension code raised an error.
    Evaluation,
    /// The extension has no realm in this worker.
    NotLoaded,
    /// The requested function or hook handler does not exist.
    FunctionNotFound,
    /// Worker-side failure unrelated to extension code.
    Internal,
}

/// Severity of a captured console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `console.log`
    Log,
    /// `console.debug`
    Debug,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
}

impl LogLevel {
    /// Maps a console method name, falling back to [`LogLevel::Log`].
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Log,
        }
    }
}

/// One captured `console.*` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLogEntry {
    /// Console method used.
    pub level: LogLevel,
    /// Space-joined rendering of the console arguments.
    pub message: String,
    /// Capture time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DebugLogEntry {
    /// Creates an entry stamped with the current UTC time.
    #[must_use]
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// A hook handler installed during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDescriptor {
    /// Lifecycle event name.
    pub hook_type: String,
    /// Handler name.
    pub name: String,
}

/// Callable surface produced by evaluating an extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    /// Names of function-valued exports, in export order.
    #[serde(default)]
    pub functions: Vec<String>,
    /// JSON-serialisable non-function exports.
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Hook handlers registered through the capability façade.
    #[serde(default)]
    pub hooks: Vec<HookDescriptor>,
}

impl EvaluationReport {
    /// Returns `true` when the export table has a function named `name`.
    #[must_use]
    pub fn exports_function(&self, name: &str) -> bool {
        self.functions.iter().any(|function| function == name)
    }
}

/// Response envelope returned by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    id: String,
    #[serde(rename = "type")]
    response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    logs: Vec<DebugLogEntry>,
}

impl WorkerResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(id: impl Into<String>, result: Value, logs: Vec<DebugLogEntry>) -> Self {
        Self {
            id: id.into(),
            response_type: ResponseType::Result,
            result: Some(result),
            error: None,
            error_kind: None,
            dependency: None,
            function: None,
            timeout_ms: None,
            stack: None,
            logs,
        }
    }

    /// Creates a failed response describing `error`, carrying any console
    /// lines the error holds.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: &SandboxError) -> Self {
        let (message, dependency, function, timeout_ms) = match error {
            SandboxError::Dependency(inner) => (
                inner.message().to_owned(),
                Some(inner.dependency().to_owned()),
                None,
                None,
            ),
            SandboxError::Evaluation { message, .. } => (message.clone(), None, None, None),
            SandboxError::FunctionNotFound { function, .. } => {
                (error.to_string(), None, Some(function.clone()), None)
            }
            SandboxError::ExecutionTimeout { timeout_ms, .. } => {
                (error.to_string(), None, None, Some(*timeout_ms))
            }
            other => (other.to_string(), None, None, None),
        };
        Self {
            id: id.into(),
            response_type: ResponseType::Error,
            result: None,
            error: Some(message),
            error_kind: Some(error.kind()),
            dependency,
            function,
            timeout_ms,
            stack: error.stack().map(str::to_owned),
            logs: error.logs().to_vec(),
        }
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` for `type: "result"` responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_type == ResponseType::Result
    }

    /// Returns the error message of a failed response.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the typed error category of a failed response.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    /// Returns the captured console lines.
    #[must_use]
    pub fn logs(&self) -> &[DebugLogEntry] {
        &self.logs
    }

    /// Converts the response back into a typed outcome for `extension`.
    ///
    /// # Errors
    ///
    /// Returns the [`SandboxError`] reconstructed from `errorKind` when the
    /// response reports a failure.
    pub fn into_outcome(self, extension: &str) -> Result<Output<Value>, SandboxError> {
        match self.response_type {
            ResponseType::Result => Ok(Output {
                value: self.result.unwrap_or(Value::Null),
                logs: self.logs,
            }),
            ResponseType::Error => Err(self.rebuild_error(extension)),
        }
    }

    fn rebuild_error(self, extension: &str) -> SandboxError {
        let message = self
            .error
            .unwrap_or_else(|| String::from("worker reported an unspecified error"));
        let owner = extension.to_owned();
        let logs = self.logs;
        match self.error_kind.unwrap_or(ErrorKind::Internal) {
            ErrorKind::Dependency => SandboxError::Dependency(DependencyResolutionError::new(
                self.dependency.unwrap_or_else(|| String::from("<unknown>")),
                message,
            )),
            ErrorKind::Timeout => SandboxError::ExecutionTimeout {
                extension: owner,
                timeout_ms: self.timeout_ms.unwrap_or_default(),
                logs,
            },
            ErrorKind::Evaluation => SandboxError::Evaluation {
                extension: owner,
                message,
                stack: self.stack,
                logs,
            },
            ErrorKind::NotLoaded => SandboxError::NotLoaded { extension: owner },
            ErrorKind::FunctionNotFound => SandboxError::FunctionNotFound {
                extension: owner,
                function: self.function.unwrap_or_default(),
            },
            ErrorKind::Internal => SandboxError::Engine { message },
        }
    }
}

/// A worker result together with the console lines captured while
/// producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Output<T> {
    /// The request's result.
    pub value: T,
    /// Console lines captured during the request, oldest first.
    pub logs: Vec<DebugLogEntry>,
}

impl<T> Output<T> {
    /// Maps the carried value, keeping the logs.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Output<U> {
        Output {
            value: f(self.value),
            logs: self.logs,
        }
    }
}

#[cfg(test)]
mod tests;
