//! Extension loader.
//!
//! The [`ExtensionLoader`] turns an [`Extension`] record into a callable
//! namespace. It hands the source and dependency manifest to an
//! [`ExtensionExecutor`], and only when evaluation succeeds does it publish
//! the namespace and install the extension's hook handlers. A failed load
//! leaves the registry exactly as it was, including any earlier successful
//! load of the same extension.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use spindle_sandbox::{
    DebugLogEntry, EvaluationReport, EvaluationRequest, ExtensionExecutor, Output, SandboxError,
};
use tracing::{debug, info, warn};

use crate::error::ExtensionError;
use crate::hooks::{HookHandler, HookRegistry};
use crate::namespace::Namespace;
use crate::record::Extension;

const LOADER_TARGET: &str = "spindle_extensions::loader";

/// An extension that is registered and callable.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedExtension {
    id: String,
    name: String,
    namespace: Namespace,
    report: EvaluationReport,
}

impl LoadedExtension {
    /// Extension id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name at load time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace its functions are called under.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Export table reported by the worker.
    #[must_use]
    pub const fn report(&self) -> &EvaluationReport {
        &self.report
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// Namespace the extension now answers to.
    pub namespace: Namespace,
    /// Export table reported by the worker.
    pub report: EvaluationReport,
    /// Console lines captured during evaluation.
    pub logs: Vec<DebugLogEntry>,
}

/// Registers extensions for invocation and hook participation.
pub struct ExtensionLoader {
    executor: Arc<dyn ExtensionExecutor>,
    hooks: Arc<HookRegistry>,
    loaded: Mutex<HashMap<String, LoadedExtension>>,
}

impl std::fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut namespaces: Vec<String> = self.registry().keys().cloned().collect();
        namespaces.sort();
        f.debug_struct("ExtensionLoader")
            .field("namespaces", &namespaces)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ExtensionLoader {
    /// Creates a loader that evaluates through `executor` and installs hook
    /// handlers into `hooks`.
    #[must_use]
    pub fn new(executor: Arc<dyn ExtensionExecutor>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            executor,
            hooks,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the hook registry handlers are installed into.
    #[must_use]
    pub const fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, LoadedExtension>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluates `extension` and registers its namespace and hooks.
    ///
    /// Loading an already loaded extension replaces it once the new source
    /// evaluates successfully.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::NamespaceConflict`] when a different
    /// extension owns the namespace, and [`ExtensionError::Sandbox`] when
    /// bundling or evaluation fails.
    pub async fn load(&self, extension: &Extension) -> Result<LoadOutcome, ExtensionError> {
        let namespace = extension.namespace();
        self.ensure_available(&namespace, extension.id())?;

        let request = EvaluationRequest::new(extension.id(), extension.code())
            .with_dependencies(extension.dependencies().for_worker())
            .with_metadata(extension.evaluation_metadata());
        let started = Instant::now();
        let Output { value: report, logs } = self.executor.evaluate(request).await?;

        let entry = LoadedExtension {
            id: extension.id().to_owned(),
            name: extension.name().to_owned(),
            namespace: namespace.clone(),
            report: report.clone(),
        };
        let conflict = {
            let mut registry = self.registry();
            let clash = registry
                .get(namespace.as_str())
                .filter(|existing| existing.id != extension.id())
                .map(|existing| ExtensionError::NamespaceConflict {
                    namespace: namespace.to_string(),
                    existing: existing.id.clone(),
                    incoming: extension.id().to_owned(),
                });
            if clash.is_none() {
                registry.insert(namespace.as_str().to_owned(), entry);
            }
            clash
        };
        if let Some(error) = conflict {
            self.discard(extension.id()).await;
            return Err(error);
        }

        self.hooks.unregister_owner(extension.id());
        for hook in &report.hooks {
            self.hooks.register(
                &hook.hook_type,
                &hook.name,
                extension.id(),
                Arc::new(SandboxHookHandler {
                    executor: Arc::clone(&self.executor),
                    extension_id: extension.id().to_owned(),
                    hook_type: hook.hook_type.clone(),
                    name: hook.name.clone(),
                }),
            );
        }

        info!(
            target: LOADER_TARGET,
            extension = extension.id(),
            namespace = %namespace,
            functions = report.functions.len(),
            hooks = report.hooks.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "extension loaded"
        );
        Ok(LoadOutcome {
            namespace,
            report,
            logs,
        })
    }

    fn ensure_available(&self, namespace: &Namespace, id: &str) -> Result<(), ExtensionError> {
        match self.registry().get(namespace.as_str()) {
            Some(existing) if existing.id != id => Err(ExtensionError::NamespaceConflict {
                namespace: namespace.to_string(),
                existing: existing.id.clone(),
                incoming: id.to_owned(),
            }),
            _ => Ok(()),
        }
    }

    /// Drops a realm evaluated for a load that lost a namespace race.
    async fn discard(&self, id: &str) {
        if let Err(error) = self.executor.unload(id).await {
            warn!(target: LOADER_TARGET, extension = id, %error, "failed to discard realm");
        }
    }

    /// Unregisters the extension with `id` and drops its realm.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::NotLoaded`] when no extension with `id` is
    /// registered, and [`ExtensionError::Sandbox`] when the worker cannot
    /// be reached.
    pub async fn unload(&self, id: &str) -> Result<LoadedExtension, ExtensionError> {
        let removed = {
            let mut registry = self.registry();
            let key = registry
                .iter()
                .find(|(_, entry)| entry.id == id)
                .map(|(key, _)| key.clone());
            key.and_then(|namespace| registry.remove(&namespace))
        };
        let Some(entry) = removed else {
            return Err(ExtensionError::NotLoaded {
                name: id.to_owned(),
            });
        };
        self.hooks.unregister_owner(id);
        self.executor.unload(id).await?;
        info!(target: LOADER_TARGET, extension = id, namespace = %entry.namespace, "extension unloaded");
        Ok(entry)
    }

    /// Calls `namespace.function(args)`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::NotLoaded`] for an unknown namespace and
    /// [`ExtensionError::Sandbox`] when the call fails.
    pub async fn call(
        &self,
        namespace: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Output<Value>, ExtensionError> {
        let id = self
            .extension_id(namespace)
            .ok_or_else(|| ExtensionError::NotLoaded {
                name: namespace.to_owned(),
            })?;
        debug!(target: LOADER_TARGET, extension = %id, namespace, function, "calling extension");
        Ok(self.executor.invoke(&id, function, args).await?)
    }

    /// Returns the id of the extension registered under `namespace`.
    #[must_use]
    pub fn extension_id(&self, namespace: &str) -> Option<String> {
        self.registry().get(namespace).map(|entry| entry.id.clone())
    }

    /// Returns the namespace of the loaded extension with `id`.
    #[must_use]
    pub fn namespace_of(&self, id: &str) -> Option<Namespace> {
        self.registry()
            .values()
            .find(|entry| entry.id == id)
            .map(|entry| entry.namespace.clone())
    }

    /// Returns every loaded extension ordered by namespace.
    #[must_use]
    pub fn loaded(&self) -> Vec<LoadedExtension> {
        let mut entries: Vec<LoadedExtension> = self.registry().values().cloned().collect();
        entries.sort_by(|left, right| left.namespace.cmp(&right.namespace));
        entries
    }
}

/// Runs a handler registered inside an extension realm.
struct SandboxHookHandler {
    executor: Arc<dyn ExtensionExecutor>,
    extension_id: String,
    hook_type: String,
    name: String,
}

#[async_trait]
impl HookHandler for SandboxHookHandler {
    async fn handle(&self, context: &Value) -> Result<Value, SandboxError> {
        let output = self
            .executor
            .invoke_hook(&self.extension_id, &self.hook_type, &self.name, context.clone())
            .await?;
        for line in &output.logs {
            debug!(
                target: LOADER_TARGET,
                extension = %self.extension_id,
                hook = %self.hook_type,
                level = ?line.level,
                "{}",
                line.message
            );
        }
        Ok(output.value)
    }
}
