//! The persisted extension record.
//!
//! An [`Extension`] is owned by the storage collaborator. The loader and
//! documentation generator read it; the host mutates a working copy (error
//! counters, debug logs) and writes it back through the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spindle_sandbox::{DebugLogEntry, DependencyManifest};
use time::OffsetDateTime;

use crate::docs::DocExample;
use crate::namespace::Namespace;

/// Debug log lines kept per extension; older lines are dropped first.
pub const MAX_DEBUG_LOGS: usize = 200;

const DEFAULT_VERSION: &str = "1.0.0";

/// Packages declared for each side of an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDependencies {
    /// Packages requested for user-interface code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<DependencyManifest>,
    /// Packages requested for code run by the execution worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<DependencyManifest>,
}

impl ExtensionDependencies {
    /// Returns the manifest bundled for the execution worker: every
    /// frontend package, overridden by the backend entry of the same name.
    #[must_use]
    pub fn for_worker(&self) -> DependencyManifest {
        self.frontend
            .iter()
            .chain(self.backend.iter())
            .flat_map(DependencyManifest::iter)
            .map(|(name, version)| (name.to_owned(), version.to_owned()))
            .collect()
    }
}

/// Free-form author metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    /// One-paragraph summary used in context documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Structured usage examples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<DocExample>,
    /// Any other author-supplied keys, passed to the extension untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A unit of plugin code with its metadata and error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    id: String,
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    code: String,
    #[serde(default)]
    dependencies: ExtensionDependencies,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
    #[serde(default)]
    error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    last_error_at: Option<OffsetDateTime>,
    #[serde(default)]
    debug: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    debug_logs: Vec<DebugLogEntry>,
    #[serde(default)]
    metadata: ExtensionMetadata,
}

fn default_version() -> String {
    String::from(DEFAULT_VERSION)
}

const fn default_enabled() -> bool {
    true
}

impl Extension {
    /// Creates an enabled extension stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            category: None,
            code: code.into(),
            dependencies: ExtensionDependencies::default(),
            enabled: true,
            is_default: false,
            created_at: now,
            updated_at: now,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            debug: false,
            debug_logs: Vec::new(),
            metadata: ExtensionMetadata::default(),
        }
    }

    /// Sets the version string.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Declares the packages bundled for the execution worker.
    #[must_use]
    pub fn with_backend_dependencies(mut self, manifest: DependencyManifest) -> Self {
        self.dependencies.backend = Some(manifest);
        self
    }

    /// Replaces the author metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ExtensionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Turns console capture on or off.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enables or disables the extension.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns the source text.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the declared packages.
    #[must_use]
    pub const fn dependencies(&self) -> &ExtensionDependencies {
        &self.dependencies
    }

    /// Returns `true` when the extension should be loaded.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` for extensions shipped with the host.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.is_default
    }

    /// Returns the creation time.
    #[must_use]
    pub const fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Returns the last edit time.
    #[must_use]
    pub const fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    /// Returns how many load or call failures have been recorded.
    #[must_use]
    pub const fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Returns the most recent failure message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns when the most recent failure happened.
    #[must_use]
    pub const fn last_error_at(&self) -> Option<OffsetDateTime> {
        self.last_error_at
    }

    /// Returns `true` when console output should be captured.
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.debug
    }

    /// Returns the retained console lines, oldest first.
    #[must_use]
    pub fn debug_logs(&self) -> &[DebugLogEntry] {
        &self.debug_logs
    }

    /// Returns the author metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    /// Returns the namespace the extension's functions are exposed under.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::for_extension(&self.id)
    }

    /// Replaces the source text and bumps `updated_at`.
    pub fn set_code(&mut self, code: impl Into<String>, at: OffsetDateTime) {
        self.code = code.into();
        self.updated_at = at;
    }

    /// Records a load or call failure.
    pub fn record_error(&mut self, message: impl Into<String>, at: OffsetDateTime) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(message.into());
        self.last_error_at = Some(at);
    }

    /// Appends console lines, keeping only the newest [`MAX_DEBUG_LOGS`].
    pub fn push_debug_logs(&mut self, logs: impl IntoIterator<Item = DebugLogEntry>) {
        self.debug_logs.extend(logs);
        let excess = self.debug_logs.len().saturating_sub(MAX_DEBUG_LOGS);
        if excess > 0 {
            self.debug_logs.drain(..excess);
        }
    }

    /// Builds the read-only `extension` object handed to the source.
    ///
    /// Author metadata keys come first; identity fields and the debug flag
    /// always reflect the record.
    #[must_use]
    pub fn evaluation_metadata(&self) -> Value {
        let mut object = self.metadata.extra.clone();
        if let Some(description) = &self.metadata.description {
            object.insert(
                String::from("description"),
                Value::String(description.clone()),
            );
        }
        object.insert(String::from("id"), Value::String(self.id.clone()));
        object.insert(String::from("name"), Value::String(self.name.clone()));
        object.insert(
            String::from("version"),
            Value::String(self.version.clone()),
        );
        if let Some(category) = &self.category {
            object.insert(String::from("category"), Value::String(category.clone()));
        }
        object.insert(String::from("debug"), Value::Bool(self.debug));
        Value::Object(object)
    }
}
