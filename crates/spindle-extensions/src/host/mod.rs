//! Extension host.
//!
//! [`ExtensionHost`] is the orchestrator callers talk to. It reads records
//! from an [`ExtensionStore`], loads them through the [`ExtensionLoader`],
//! routes calls and lifecycle events, and writes error history and debug
//! logs back to the store. A broken extension is skipped with its failure
//! recorded; it never takes unrelated extensions down with it.

use std::sync::Arc;

use serde_json::Value;
use spindle_sandbox::{DebugLogEntry, ExtensionExecutor, Output, SandboxError};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::docs::generate_with_exports;
use crate::error::ExtensionError;
use crate::hooks::{HookOutcome, HookRegistry};
use crate::loader::{ExtensionLoader, LoadOutcome};
use crate::namespace::Namespace;
use crate::record::Extension;
use crate::store::ExtensionStore;

const HOST_TARGET: &str = "spindle_extensions::host";

/// Separator between per-extension sections of the context document.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// What [`ExtensionHost::load_all`] did.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// `(id, namespace)` of every extension now loaded.
    pub loaded: Vec<(String, Namespace)>,
    /// Extensions that failed to load, with the reason.
    pub failed: Vec<(String, ExtensionError)>,
    /// Disabled extensions that were not attempted.
    pub skipped: Vec<String>,
}

/// Loads extensions from a store and dispatches calls and events to them.
pub struct ExtensionHost {
    store: Arc<dyn ExtensionStore>,
    loader: ExtensionLoader,
}

impl std::fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl ExtensionHost {
    /// Creates a host with a fresh hook registry.
    #[must_use]
    pub fn new(store: Arc<dyn ExtensionStore>, executor: Arc<dyn ExtensionExecutor>) -> Self {
        Self {
            store,
            loader: ExtensionLoader::new(executor, Arc::new(HookRegistry::new())),
        }
    }

    /// Returns the loader.
    #[must_use]
    pub const fn loader(&self) -> &ExtensionLoader {
        &self.loader
    }

    /// Returns the hook registry.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        self.loader.hooks()
    }

    /// Loads every enabled extension in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Store`] when the store cannot be listed.
    /// Individual load failures are reported in the summary instead.
    pub async fn load_all(&self) -> Result<LoadSummary, ExtensionError> {
        let mut summary = LoadSummary::default();
        for extension in self.store.list().await? {
            if !extension.is_enabled() {
                summary.skipped.push(extension.id().to_owned());
                continue;
            }
            match self.load_record(&extension).await {
                Ok(outcome) => summary
                    .loaded
                    .push((extension.id().to_owned(), outcome.namespace)),
                Err(error) => summary.failed.push((extension.id().to_owned(), error)),
            }
        }
        info!(
            target: HOST_TARGET,
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "extensions loaded"
        );
        Ok(summary)
    }

    /// Loads (or reloads) the extension with `id` from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Store`] for unknown ids,
    /// [`ExtensionError::Disabled`] for disabled extensions, and whatever
    /// [`ExtensionLoader::load`] reports.
    pub async fn load(&self, id: &str) -> Result<LoadOutcome, ExtensionError> {
        let extension = self.store.get(id).await?;
        if !extension.is_enabled() {
            return Err(ExtensionError::Disabled { id: id.to_owned() });
        }
        self.load_record(&extension).await
    }

    async fn load_record(&self, extension: &Extension) -> Result<LoadOutcome, ExtensionError> {
        match self.loader.load(extension).await {
            Ok(outcome) => {
                if extension.is_debug() && !outcome.logs.is_empty() {
                    let logs = outcome.logs.clone();
                    self.persist(extension.id(), move |record| record.push_debug_logs(logs))
                        .await;
                }
                Ok(outcome)
            }
            Err(error) => {
                warn!(
                    target: HOST_TARGET,
                    extension = extension.id(),
                    %error,
                    "extension failed to load"
                );
                self.record_failure(extension.id(), &error).await;
                Err(error)
            }
        }
    }

    /// Unloads the extension with `id`.
    ///
    /// # Errors
    ///
    /// See [`ExtensionLoader::unload`].
    pub async fn unload(&self, id: &str) -> Result<(), ExtensionError> {
        self.loader.unload(id).await.map(|_| ())
    }

    /// Calls `namespace.function(args)`.
    ///
    /// Timeouts and errors thrown by the function are recorded on the
    /// extension's record before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::NotLoaded`] for unknown namespaces and
    /// [`ExtensionError::Sandbox`] when the call fails.
    pub async fn call(
        &self,
        namespace: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ExtensionError> {
        let id = self
            .loader
            .extension_id(namespace)
            .ok_or_else(|| ExtensionError::NotLoaded {
                name: namespace.to_owned(),
            })?;
        match self.loader.call(namespace, function, args).await {
            Ok(Output { value, logs }) => {
                self.persist_logs(&id, logs).await;
                Ok(value)
            }
            Err(error) => {
                if is_call_failure(&error) {
                    warn!(
                        target: HOST_TARGET,
                        extension = %id,
                        namespace,
                        function,
                        %error,
                        "extension call failed"
                    );
                    self.record_failure(&id, &error).await;
                }
                Err(error)
            }
        }
    }

    /// Fires a lifecycle event and returns the merged handler contributions.
    pub async fn trigger(&self, hook_type: &str, context: &Value) -> HookOutcome {
        self.hooks().invoke(hook_type, context).await
    }

    /// Renders context documentation for every loaded extension from its
    /// current stored source.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Store`] when a loaded extension's record
    /// cannot be read.
    pub async fn context_documentation(&self) -> Result<String, ExtensionError> {
        let mut sections = Vec::new();
        for loaded in self.loader.loaded() {
            let record = self.store.get(loaded.id()).await?;
            sections.push(generate_with_exports(&record, &loaded.report().functions));
        }
        Ok(sections.join(CONTEXT_SEPARATOR))
    }

    async fn persist_logs(&self, id: &str, logs: Vec<DebugLogEntry>) {
        if logs.is_empty() {
            return;
        }
        self.persist(id, move |record| {
            if record.is_debug() {
                record.push_debug_logs(logs);
            }
        })
        .await;
    }

    /// Counts the failure against the record. Console lines the extension
    /// wrote before failing are kept too when the record is in debug mode.
    async fn record_failure(&self, id: &str, error: &ExtensionError) {
        let message = error.to_string();
        let logs = match error {
            ExtensionError::Sandbox(cause) => cause.logs().to_vec(),
            _ => Vec::new(),
        };
        self.persist(id, move |record| {
            if record.is_debug() && !logs.is_empty() {
                record.push_debug_logs(logs);
            }
            record.record_error(message, OffsetDateTime::now_utc());
        })
        .await;
    }

    /// Applies `change` to the stored record. Store failures are logged;
    /// they never fail the operation that produced the change.
    async fn persist(&self, id: &str, change: impl FnOnce(&mut Extension) + Send) {
        let mut record = match self.store.get(id).await {
            Ok(record) => record,
            Err(error) => {
                warn!(target: HOST_TARGET, extension = id, %error, "failed to read record");
                return;
            }
        };
        change(&mut record);
        if let Err(error) = self.store.update(record).await {
            warn!(target: HOST_TARGET, extension = id, %error, "failed to write record");
        }
    }
}

/// Failures attributable to the extension's own code.
const fn is_call_failure(error: &ExtensionError) -> bool {
    matches!(
        error,
        ExtensionError::Sandbox(
            SandboxError::ExecutionTimeout { .. } | SandboxError::Evaluation { .. }
        )
    )
}

#[cfg(test)]
mod tests;
