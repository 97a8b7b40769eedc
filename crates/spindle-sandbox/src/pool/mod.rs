//! A fixed set of workers with sticky extension placement.
//!
//! Each extension lives in exactly one worker's isolate. The first
//! evaluation reserves a worker round-robin before it is sent, so
//! concurrent first loads of one id land on the same worker. The
//! reservation becomes a placement once an evaluation succeeds; later
//! evaluations, calls and hook invocations go to the same worker until it is
//! unloaded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::bundler::DependencyBundler;
use crate::error::SandboxError;
use crate::executor::{EvaluationRequest, ExtensionExecutor};
use crate::profile::SandboxProfile;
use crate::protocol::{EvaluationReport, Output};
use crate::worker::Worker;

const POOL_TARGET: &str = "spindle_sandbox::pool";

#[derive(Debug, Clone, Copy)]
struct Placement {
    worker: usize,
    loaded: bool,
}

/// Routes extension requests to a fixed set of [`Worker`]s.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    placements: Mutex<HashMap<String, Placement>>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Starts `size` workers sharing `bundler`. A size of zero starts one.
    ///
    /// # Errors
    ///
    /// Returns the first [`SandboxError::WorkerUnavailable`] raised while
    /// starting a worker; already started workers are shut down.
    pub fn spawn(
        size: usize,
        profile: &SandboxProfile,
        bundler: &DependencyBundler,
    ) -> Result<Self, SandboxError> {
        let workers = (0..size.max(1))
            .map(|index| Worker::spawn(index, profile.clone(), bundler.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(target: POOL_TARGET, workers = workers.len(), "worker pool ready");
        Ok(Self {
            workers,
            placements: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always `false`; a pool holds at least one worker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns the worker index hosting `extension_id`, if any.
    #[must_use]
    pub fn placement(&self, extension_id: &str) -> Option<usize> {
        self.placements()
            .get(extension_id)
            .filter(|placement| placement.loaded)
            .map(|placement| placement.worker)
    }

    fn placements(&self) -> MutexGuard<'_, HashMap<String, Placement>> {
        self.placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self, index: usize) -> Result<&Worker, SandboxError> {
        self.workers
            .get(index)
            .ok_or_else(|| SandboxError::WorkerUnavailable {
                worker: index,
                message: String::from("no such worker in the pool"),
            })
    }

    fn placed(&self, extension_id: &str) -> Result<&Worker, SandboxError> {
        let index = self
            .placement(extension_id)
            .ok_or_else(|| SandboxError::NotLoaded {
                extension: extension_id.to_owned(),
            })?;
        self.worker(index)
    }

    fn next_index(&self) -> usize {
        self.cursor
            .fetch_add(1, Ordering::Relaxed)
            .checked_rem(self.workers.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExtensionExecutor for WorkerPool {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<Output<EvaluationReport>, SandboxError> {
        let extension = request.extension_id().to_owned();
        let index = self
            .placements()
            .entry(extension.clone())
            .or_insert_with(|| Placement {
                worker: self.next_index(),
                loaded: false,
            })
            .worker;

        let outcome = match self.worker(index) {
            Ok(worker) => worker.evaluate(request).await,
            Err(error) => Err(error),
        };

        let mut placements = self.placements();
        if outcome.is_ok() {
            let previous = placements.insert(
                extension.clone(),
                Placement {
                    worker: index,
                    loaded: true,
                },
            );
            if previous.is_none_or(|placement| !placement.loaded) {
                debug!(target: POOL_TARGET, extension, worker = index, "extension placed");
            }
        } else if placements
            .get(&extension)
            .is_some_and(|placement| !placement.loaded)
        {
            placements.remove(&extension);
        }
        outcome
    }

    async fn invoke(
        &self,
        extension_id: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Output<Value>, SandboxError> {
        self.placed(extension_id)?
            .invoke(extension_id, function, args)
            .await
    }

    async fn invoke_hook(
        &self,
        extension_id: &str,
        hook_type: &str,
        name: &str,
        context: Value,
    ) -> Result<Output<Value>, SandboxError> {
        self.placed(extension_id)?
            .invoke_hook(extension_id, hook_type, name, context)
            .await
    }

    async fn unload(&self, extension_id: &str) -> Result<(), SandboxError> {
        let Some(placement) = self.placements().remove(extension_id) else {
            return Ok(());
        };
        self.worker(placement.worker)?.unload(extension_id).await
    }
}

#[cfg(test)]
mod tests;
