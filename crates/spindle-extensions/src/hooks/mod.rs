//! Lifecycle hook registry.
//!
//! Extensions register named handlers for lifecycle events. Invoking a hook
//! runs every handler for that event concurrently, then merges the partial
//! objects they return in registration order, so the last registered handler
//! wins when two set the same field. A failing handler is logged and
//! reported in the outcome; it never stops its siblings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use spindle_sandbox::SandboxError;
use tracing::{debug, error, warn};

use crate::error::HookHandlerError;

const HOOKS_TARGET: &str = "spindle_extensions::hooks";

/// Fired after a user uploads a file. Handlers may contribute
/// `{ description }` and other metadata for the stored file.
pub const AFTER_FILE_UPLOAD: &str = "afterFileUpload";

/// Every lifecycle event the host fires.
pub const KNOWN_HOOKS: &[&str] = &[AFTER_FILE_UPLOAD];

/// Partial result contributed by one handler.
pub type PartialUpdate = Map<String, Value>;

/// Code run when a hook fires.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handles one event. `Null` means no contribution.
    ///
    /// # Errors
    ///
    /// Returns the sandbox failure raised while running the handler.
    async fn handle(&self, context: &Value) -> Result<Value, SandboxError>;
}

#[derive(Clone)]
struct Registration {
    name: String,
    owner: String,
    handler: Arc<dyn HookHandler>,
}

impl Registration {
    fn is(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }
}

/// One handler's successful contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// Handler name.
    pub name: String,
    /// Id of the extension that registered the handler.
    pub owner: String,
    /// The partial object returned.
    pub update: PartialUpdate,
}

/// Result of firing a hook.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// Contributions in registration order.
    pub contributions: Vec<Contribution>,
    /// Handlers that failed, in registration order.
    pub failures: Vec<HookHandlerError>,
}

impl HookOutcome {
    /// Merges every contribution in order; later handlers override earlier
    /// ones field by field.
    #[must_use]
    pub fn merged(&self) -> PartialUpdate {
        let mut merged = PartialUpdate::new();
        self.apply_to(&mut merged);
        merged
    }

    /// Applies every contribution to `target` in order.
    pub fn apply_to(&self, target: &mut PartialUpdate) {
        for contribution in &self.contributions {
            target.extend(
                contribution
                    .update
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }
    }
}

/// Registered handlers keyed by event name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<HashMap<String, Vec<Registration>>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks();
        let mut map = f.debug_map();
        for (hook_type, registrations) in hooks.iter() {
            map.entry(hook_type, &registrations.len());
        }
        map.finish()
    }
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn hooks(&self) -> MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` for `hook_type` under `name` on behalf of `owner`.
    ///
    /// A registration is identified by `(hook_type, owner, name)`. An earlier
    /// handler with the same identity is replaced and the new one moves to the
    /// end of the invocation order; handlers of other owners that share the
    /// name are left alone.
    pub fn register(
        &self,
        hook_type: &str,
        name: &str,
        owner: &str,
        handler: Arc<dyn HookHandler>,
    ) {
        let mut hooks = self.hooks();
        let registrations = hooks.entry(hook_type.to_owned()).or_default();
        let count = registrations.len();
        registrations.retain(|registration| !registration.is(owner, name));
        if registrations.len() != count {
            debug!(target: HOOKS_TARGET, hook = hook_type, name, owner, "hook handler replaced");
        }
        registrations.push(Registration {
            name: name.to_owned(),
            owner: owner.to_owned(),
            handler,
        });
    }

    /// Removes the handler `owner` registered as `(hook_type, name)`.
    pub fn unregister(&self, hook_type: &str, owner: &str, name: &str) -> bool {
        let mut hooks = self.hooks();
        let Some(registrations) = hooks.get_mut(hook_type) else {
            return false;
        };
        let count = registrations.len();
        registrations.retain(|registration| !registration.is(owner, name));
        let removed = registrations.len() != count;
        if registrations.is_empty() {
            hooks.remove(hook_type);
        }
        removed
    }

    /// Removes every handler installed by `owner`, returning how many.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks();
        let mut removed = 0_usize;
        for registrations in hooks.values_mut() {
            let before = registrations.len();
            registrations.retain(|registration| registration.owner != owner);
            removed = removed.saturating_add(before.saturating_sub(registrations.len()));
        }
        hooks.retain(|_, registrations| !registrations.is_empty());
        if removed > 0 {
            debug!(target: HOOKS_TARGET, owner, removed, "hook handlers removed");
        }
        removed
    }

    /// Returns `(name, owner)` for each handler of `hook_type`, in
    /// invocation order.
    #[must_use]
    pub fn handlers(&self, hook_type: &str) -> Vec<(String, String)> {
        self.hooks()
            .get(hook_type)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|registration| (registration.name.clone(), registration.owner.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fires `hook_type` with `context`.
    pub async fn invoke(&self, hook_type: &str, context: &Value) -> HookOutcome {
        let registrations = self.hooks().get(hook_type).cloned().unwrap_or_default();
        if registrations.is_empty() {
            return HookOutcome::default();
        }

        let results = join_all(
            registrations
                .iter()
                .map(|registration| registration.handler.handle(context)),
        )
        .await;

        let mut outcome = HookOutcome::default();
        for (registration, result) in registrations.into_iter().zip(results) {
            match result {
                Ok(Value::Object(update)) => outcome.contributions.push(Contribution {
                    name: registration.name,
                    owner: registration.owner,
                    update,
                }),
                Ok(Value::Null) => {}
                Ok(other) => warn!(
                    target: HOOKS_TARGET,
                    hook = hook_type,
                    name = %registration.name,
                    owner = %registration.owner,
                    returned = %other,
                    "hook handler returned a non-object; ignored"
                ),
                Err(cause) => {
                    let failure = HookHandlerError::sandbox(
                        hook_type,
                        registration.name,
                        registration.owner,
                        cause,
                    );
                    error!(
                        target: HOOKS_TARGET,
                        hook = hook_type,
                        name = failure.name(),
                        owner = failure.owner(),
                        error = failure.message(),
                        "hook handler failed"
                    );
                    outcome.failures.push(failure);
                }
            }
        }
        debug!(
            target: HOOKS_TARGET,
            hook = hook_type,
            contributions = outcome.contributions.len(),
            failures = outcome.failures.len(),
            "hook invoked"
        );
        outcome
    }
}
