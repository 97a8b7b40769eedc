//! A dedicated execution thread driven by serialised messages.
//!
//! [`Worker::spawn`] starts an OS thread that owns one [`Isolate`] and a
//! current-thread tokio runtime used for dependency resolution. The
//! orchestrator side never touches engine state: it serialises a
//! [`WorkerMessage`], hands it over with a one-shot reply channel and parses
//! the [`WorkerResponse`] that comes back. Requests are handled one at a
//! time in arrival order.
//!
//! Time spent queued behind other requests does not count against a
//! request's budget. The worker signals when it picks a request up, and only
//! then does the orchestrator race the reply against the profile's timeout
//! plus a short grace period. A request abandoned that way keeps running
//! inside the worker until the engine deadline stops it; its late reply is
//! dropped. Requests whose caller stopped waiting while they were queued are
//! skipped without running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bundler::{Bundle, DependencyBundler};
use crate::error::SandboxError;
use crate::executor::{EvaluationRequest, ExtensionExecutor};
use crate::isolate::Isolate;
use crate::profile::SandboxProfile;
use crate::protocol::{EvaluationReport, Output, WorkerMessage, WorkerRequest, WorkerResponse};

const WORKER_TARGET: &str = "spindle_sandbox::worker";

/// Extra time the orchestrator waits beyond the engine deadline.
const RESPONSE_GRACE: Duration = Duration::from_millis(500);

struct Envelope {
    payload: String,
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<String>,
}

/// Handle to one execution thread.
///
/// Dropping the handle closes the inbound channel; the thread finishes the
/// request in progress and exits.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    inbox: Option<mpsc::Sender<Envelope>>,
    thread: Option<JoinHandle<()>>,
    budget: Duration,
    timeout_ms: u64,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("bytes", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Starts worker `index` with the given limits and dependency bundler.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::WorkerUnavailable`] when the thread cannot be
    /// started or its engine fails to initialise.
    pub fn spawn(
        index: usize,
        profile: SandboxProfile,
        bundler: DependencyBundler,
    ) -> Result<Self, SandboxError> {
        let budget = profile.timeout().saturating_add(RESPONSE_GRACE);
        let timeout_ms = profile.timeout_ms();
        let (inbox, requests) = mpsc::channel::<Envelope>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), SandboxError>>(1);

        let thread = thread::Builder::new()
            .name(format!("spindle-worker-{index}"))
            .spawn(move || serve(index, profile, &bundler, &requests, &ready_tx))
            .map_err(|error| SandboxError::WorkerUnavailable {
                worker: index,
                message: format!("cannot start thread: {error}"),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                return Err(SandboxError::WorkerUnavailable {
                    worker: index,
                    message: error.to_string(),
                });
            }
            Err(_) => {
                return Err(SandboxError::WorkerUnavailable {
                    worker: index,
                    message: String::from("thread exited during start-up"),
                });
            }
        }
        info!(target: WORKER_TARGET, worker = index, "worker started");

        Ok(Self {
            index,
            inbox: Some(inbox),
            thread: Some(thread),
            budget,
            timeout_ms,
            sequence: AtomicU64::new(0),
        })
    }

    /// Returns the worker's position in its pool.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    fn unavailable(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::WorkerUnavailable {
            worker: self.index,
            message: message.into(),
        }
    }

    async fn send(&self, request: WorkerRequest) -> Result<Output<Value>, SandboxError> {
        let extension = request.extension_id().to_owned();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{sequence}", self.index);
        let payload = serde_json::to_string(&WorkerMessage::new(id.clone(), request))
            .map_err(|error| SandboxError::protocol(format!("cannot encode request: {error}")))?;

        let (started, picked_up) = oneshot::channel();
        let (reply, response) = oneshot::channel();
        self.inbox
            .as_ref()
            .ok_or_else(|| self.unavailable("worker is shutting down"))?
            .send(Envelope {
                payload,
                started,
                reply,
            })
            .map_err(|_| self.unavailable("worker thread has exited"))?;

        if picked_up.await.is_err() {
            return Err(self.unavailable("worker dropped the request"));
        }
        let text = match tokio::time::timeout(self.budget, response).await {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => return Err(self.unavailable("worker dropped the request")),
            Err(_) => {
                warn!(
                    target: WORKER_TARGET,
                    worker = self.index,
                    extension,
                    request = %id,
                    "no reply before the deadline"
                );
                return Err(SandboxError::ExecutionTimeout {
                    extension,
                    timeout_ms: self.timeout_ms,
                    logs: Vec::new(),
                });
            }
        };

        let response: WorkerResponse = serde_json::from_str(&text)
            .map_err(|error| SandboxError::protocol(format!("cannot decode response: {error}")))?;
        if response.id() != id {
            return Err(SandboxError::protocol(format!(
                "response id '{}' does not match request '{id}'",
                response.id()
            )));
        }
        response.into_outcome(&extension)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.inbox.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: WORKER_TARGET, worker = self.index, "worker thread panicked");
        }
    }
}

#[async_trait]
impl ExtensionExecutor for Worker {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<Output<EvaluationReport>, SandboxError> {
        let output = self.send(request.into_wire()).await?;
        let report = serde_json::from_value(output.value).map_err(|error| {
            SandboxError::protocol(format!("malformed evaluation report: {error}"))
        })?;
        Ok(Output {
            value: report,
            logs: output.logs,
        })
    }

    async fn invoke(
        &self,
        extension_id: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Output<Value>, SandboxError> {
        self.send(WorkerRequest::Invoke {
            extension_id: extension_id.to_owned(),
            function: function.to_owned(),
            args,
        })
        .await
    }

    async fn invoke_hook(
        &self,
        extension_id: &str,
        hook_type: &str,
        name: &str,
        context: Value,
    ) -> Result<Output<Value>, SandboxError> {
        self.send(WorkerRequest::InvokeHook {
            extension_id: extension_id.to_owned(),
            hook_type: hook_type.to_owned(),
            name: name.to_owned(),
            context,
        })
        .await
    }

    async fn unload(&self, extension_id: &str) -> Result<(), SandboxError> {
        self.send(WorkerRequest::Unload {
            extension_id: extension_id.to_owned(),
        })
        .await
        .map(|_| ())
    }
}

/// Thread body: start the engine, report readiness, then serve requests
/// until the inbound channel closes.
fn serve(
    index: usize,
    profile: SandboxProfile,
    bundler: &DependencyBundler,
    requests: &mpsc::Receiver<Envelope>,
    ready: &mpsc::SyncSender<Result<(), SandboxError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            let _ignored = ready.send(Err(SandboxError::engine(format!(
                "cannot start worker runtime: {error}"
            ))));
            return;
        }
    };
    let mut isolate = match Isolate::new(profile) {
        Ok(isolate) => isolate,
        Err(error) => {
            let _ignored = ready.send(Err(error));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut host = Host {
        index,
        isolate: &mut isolate,
        runtime: &runtime,
        bundler,
    };
    while let Ok(envelope) = requests.recv() {
        if envelope.reply.is_closed() || envelope.started.send(()).is_err() {
            debug!(target: WORKER_TARGET, worker = index, "caller stopped waiting; request skipped");
            continue;
        }
        let reply = host.handle(&envelope.payload);
        if envelope.reply.send(reply).is_err() {
            debug!(target: WORKER_TARGET, worker = index, "caller stopped waiting; reply dropped");
        }
    }
    debug!(target: WORKER_TARGET, worker = index, "worker stopped");
}

struct Host<'a> {
    index: usize,
    isolate: &'a mut Isolate,
    runtime: &'a tokio::runtime::Runtime,
    bundler: &'a DependencyBundler,
}

impl Host<'_> {
    fn handle(&mut self, payload: &str) -> String {
        let response = match serde_json::from_str::<WorkerMessage>(payload) {
            Ok(message) => {
                let (id, request) = message.into_parts();
                let started = Instant::now();
                let kind = request_kind(&request);
                let extension = request.extension_id().to_owned();
                let outcome = self.dispatch(request);
                debug!(
                    target: WORKER_TARGET,
                    worker = self.index,
                    extension,
                    request = kind,
                    ok = outcome.is_ok(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "request handled"
                );
                match outcome {
                    Ok(output) => WorkerResponse::success(id, output.value, output.logs),
                    Err(error) => WorkerResponse::failure(id, &error),
                }
            }
            Err(error) => WorkerResponse::failure(
                String::new(),
                &SandboxError::protocol(format!("cannot decode request: {error}")),
            ),
        };
        serde_json::to_string(&response).unwrap_or_default()
    }

    fn dispatch(&mut self, request: WorkerRequest) -> Result<Output<Value>, SandboxError> {
        match request {
            WorkerRequest::Evaluate {
                extension_id,
                code,
                dependencies,
                metadata,
            } => {
                let bundle = match dependencies {
                    Some(manifest) => self.runtime.block_on(self.bundler.resolve(&manifest))?,
                    None => Bundle::new(),
                };
                let output = self.isolate.evaluate(
                    &extension_id,
                    code,
                    bundle,
                    metadata.unwrap_or(Value::Null),
                )?;
                let logs = output.logs;
                let report = serde_json::to_value(output.value).map_err(|error| {
                    SandboxError::protocol(format!("cannot encode evaluation report: {error}"))
                })?;
                Ok(Output {
                    value: report,
                    logs,
                })
            }
            WorkerRequest::Invoke {
                extension_id,
                function,
                args,
            } => self.isolate.invoke(&extension_id, &function, &args),
            WorkerRequest::InvokeHook {
                extension_id,
                hook_type,
                name,
                context,
            } => self
                .isolate
                .invoke_hook(&extension_id, &hook_type, &name, &context),
            WorkerRequest::Unload { extension_id } => {
                self.isolate.unload(&extension_id);
                Ok(Output {
                    value: Value::Null,
                    logs: Vec::new(),
                })
            }
        }
    }
}

const fn request_kind(request: &WorkerRequest) -> &'static str {
    match request {
        WorkerRequest::Evaluate { .. } => "evaluate",
        WorkerRequest::Invoke { .. } => "invoke",
        WorkerRequest::InvokeHook { .. } => "invokeHook",
        WorkerRequest::Unload { .. } => "unload",
    }
}
