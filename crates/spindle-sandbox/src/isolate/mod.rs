//! Embedded engine state owned by one worker thread.
//!
//! An [`Isolate`] wraps a single QuickJS runtime. Each loaded extension gets
//! its own realm (engine context) so extensions never observe each other's
//! globals. All values cross between Rust and JavaScript as JSON text.
//!
//! Requests run as tracked tasks: the control object installed by the
//! prelude starts the work and records its settlement, and the isolate
//! pumps pending jobs until the task settles or the deadline passes. The
//! runtime's interrupt handler aborts busy loops at the same deadline.

mod bindings;
mod modules;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rquickjs::convert::Coerced;
use rquickjs::{Context, Ctx, Function, Object, Runtime};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use self::modules::{BundleLoader, BundleResolver, ModuleTable};
use crate::bundler::Bundle;
use crate::error::{DependencyResolutionError, SandboxError};
use crate::profile::SandboxProfile;
use crate::protocol::{DebugLogEntry, EvaluationReport, LogLevel, Output};

const ISOLATE_TARGET: &str = "spindle_sandbox::isolate";
const CONSOLE_TARGET: &str = "spindle_sandbox::console";
const INSPECT_TARGET: &str = "spindle_sandbox::inspect";

const PRELUDE: &str = include_str!("prelude.js");
const CONTROL_GLOBAL: &str = "__spindle";

/// Sleep between polls while a task waits on nothing runnable.
const IDLE_POLL: Duration = Duration::from_millis(1);
/// Jobs run with an expired deadline before the runtime is rebuilt.
const PURGE_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Default)]
struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    fn set(&self, value: Option<Instant>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn arm(&self, budget: Duration) {
        self.set(Instant::now().checked_add(budget));
    }

    fn expire_now(&self) {
        self.set(Some(Instant::now()));
    }

    fn disarm(&self) {
        self.set(None);
    }

    fn expired(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Console sink for one realm.
#[derive(Clone)]
struct LogSink {
    extension: Rc<str>,
    capture: bool,
    lines: Rc<RefCell<Vec<DebugLogEntry>>>,
}

impl LogSink {
    fn new(extension: &str, capture: bool) -> Self {
        Self {
            extension: Rc::from(extension),
            capture,
            lines: Rc::default(),
        }
    }

    fn record(&self, method: &str, message: String) {
        let extension = &*self.extension;
        let level = LogLevel::from_method(method);
        match level {
            LogLevel::Error => error!(target: CONSOLE_TARGET, extension, "{message}"),
            LogLevel::Warn => warn!(target: CONSOLE_TARGET, extension, "{message}"),
            LogLevel::Info => info!(target: CONSOLE_TARGET, extension, "{message}"),
            LogLevel::Log | LogLevel::Debug => debug!(target: CONSOLE_TARGET, extension, "{message}"),
        }
        if self.capture {
            self.lines.borrow_mut().push(DebugLogEntry::now(level, message));
        }
    }

    fn drain(&self) -> Vec<DebugLogEntry> {
        self.lines.borrow_mut().drain(..).collect()
    }
}

/// What is needed to rebuild a realm after the runtime is replaced.
#[derive(Clone)]
struct Recipe {
    code: String,
    bundle: Bundle,
    metadata: Value,
}

struct Realm {
    context: Context,
    logs: LogSink,
    recipe: Recipe,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum TaskState {
    Pending,
    Resolved {
        #[serde(default)]
        value: Value,
    },
    Rejected {
        error: TaskFailure,
    },
    Missing,
}

#[derive(Debug, Deserialize)]
struct TaskFailure {
    message: String,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    dependency: Option<String>,
    #[serde(default)]
    function: Option<String>,
}

impl TaskFailure {
    fn into_error(self, extension: &str) -> SandboxError {
        match self.kind.as_deref() {
            Some("dependency") => SandboxError::Dependency(DependencyResolutionError::new(
                self.dependency.unwrap_or_default(),
                self.message,
            )),
            Some("functionNotFound") => SandboxError::FunctionNotFound {
                extension: extension.to_owned(),
                function: self.function.unwrap_or_default(),
            },
            _ => SandboxError::Evaluation {
                extension: extension.to_owned(),
                message: self.message,
                stack: self.stack,
                logs: Vec::new(),
            },
        }
    }
}

/// Single-threaded engine host for a set of extension realms.
pub(crate) struct Isolate {
    realms: HashMap<String, Realm>,
    runtime: Runtime,
    modules: ModuleTable,
    deadline: Deadline,
    profile: SandboxProfile,
    tasks: u64,
}

impl Isolate {
    /// Starts an engine runtime limited by `profile`.
    pub(crate) fn new(profile: SandboxProfile) -> Result<Self, SandboxError> {
        let deadline = Deadline::default();
        let (runtime, modules) = start_runtime(&profile, &deadline)?;
        Ok(Self {
            realms: HashMap::new(),
            runtime,
            modules,
            deadline,
            profile,
            tasks: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_loaded(&self, extension: &str) -> bool {
        self.realms.contains_key(extension)
    }

    /// Evaluates extension source into a fresh realm.
    ///
    /// The realm replaces any previous realm for the same id only when
    /// evaluation succeeds.
    pub(crate) fn evaluate(
        &mut self,
        extension: &str,
        code: String,
        bundle: Bundle,
        metadata: Value,
    ) -> Result<Output<EvaluationReport>, SandboxError> {
        let outcome = self.evaluate_once(extension, Recipe {
            code,
            bundle,
            metadata,
        });
        self.recover_if_timed_out(&outcome);
        outcome
    }

    /// Calls an exported function of a loaded extension.
    pub(crate) fn invoke(
        &mut self,
        extension: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Output<Value>, SandboxError> {
        let args_json = serde_json::to_string(args)
            .map_err(|error| SandboxError::protocol(format!("unserialisable arguments: {error}")))?;
        let target = function.to_owned();
        let outcome = self.run_task(extension, move |ctx: &Ctx<'_>, task: String| {
            control(ctx, "invoke")?.call::<_, ()>((task, target, args_json))
        });
        self.recover_if_timed_out(&outcome);
        outcome
    }

    /// Runs one hook handler registered by a loaded extension.
    pub(crate) fn invoke_hook(
        &mut self,
        extension: &str,
        hook_type: &str,
        name: &str,
        context: &Value,
    ) -> Result<Output<Value>, SandboxError> {
        let context_json = context.to_string();
        let hook = (hook_type.to_owned(), name.to_owned());
        let outcome = self.run_task(extension, move |ctx: &Ctx<'_>, task: String| {
            control(ctx, "invokeHook")?.call::<_, ()>((task, hook.0, hook.1, context_json))
        });
        self.recover_if_timed_out(&outcome);
        outcome
    }

    /// Drops the realm of `extension`. Unknown ids are ignored.
    pub(crate) fn unload(&mut self, extension: &str) {
        if self.realms.remove(extension).is_some() {
            debug!(target: ISOLATE_TARGET, extension, "realm dropped");
        }
    }

    fn next_task(&mut self) -> String {
        self.tasks = self.tasks.wrapping_add(1);
        format!("task-{}", self.tasks)
    }

    fn timeout(&self, extension: &str) -> SandboxError {
        SandboxError::ExecutionTimeout {
            extension: extension.to_owned(),
            timeout_ms: self.profile.timeout_ms(),
            logs: Vec::new(),
        }
    }

    fn evaluate_once(
        &mut self,
        extension: &str,
        recipe: Recipe,
    ) -> Result<Output<EvaluationReport>, SandboxError> {
        self.modules.install(&recipe.bundle);
        let capture = self.profile.console_policy().captures() && debug_enabled(&recipe.metadata);
        let request = bindings::evaluation_request(&recipe.bundle, &recipe.metadata);
        let code = recipe.code.clone();
        let realm = self.open_realm(extension, capture, recipe)?;
        let task = self.next_task();

        self.deadline.arm(self.profile.timeout());
        let outcome = realm
            .context
            .with(|ctx| {
                control(&ctx, "begin")
                    .and_then(|begin| begin.call::<_, ()>((task.clone(), request, code)))
                    .map_err(|error| self.script_failure(&ctx, extension, &error))
            })
            .and_then(|()| self.settle(&realm.context, extension, &task));
        self.deadline.disarm();
        let logs = realm.logs.drain();

        let value = match outcome {
            Ok(value) => value,
            Err(error) => return Err(error.with_logs(logs)),
        };
        let report: EvaluationReport = serde_json::from_value(value).map_err(|error| {
            SandboxError::protocol(format!("malformed evaluation report: {error}"))
        })?;
        debug!(
            target: ISOLATE_TARGET,
            extension,
            functions = report.functions.len(),
            hooks = report.hooks.len(),
            modules = self.modules.len(),
            "extension evaluated"
        );
        if self.realms.insert(extension.to_owned(), realm).is_some() {
            debug!(target: ISOLATE_TARGET, extension, "previous realm replaced");
        }
        Ok(Output {
            value: report,
            logs,
        })
    }

    fn run_task<F>(&mut self, extension: &str, start: F) -> Result<Output<Value>, SandboxError>
    where
        F: for<'js> FnOnce(&Ctx<'js>, String) -> rquickjs::Result<()>,
    {
        let task = self.next_task();
        let realm = self
            .realms
            .get(extension)
            .ok_or_else(|| SandboxError::NotLoaded {
                extension: extension.to_owned(),
            })?;

        self.deadline.arm(self.profile.timeout());
        let outcome = realm
            .context
            .with(|ctx| {
                start(&ctx, task.clone()).map_err(|error| self.script_failure(&ctx, extension, &error))
            })
            .and_then(|()| self.settle(&realm.context, extension, &task));
        self.deadline.disarm();
        let logs = realm.logs.drain();
        match outcome {
            Ok(value) => Ok(Output { value, logs }),
            Err(error) => Err(error.with_logs(logs)),
        }
    }

    fn open_realm(
        &self,
        extension: &str,
        capture: bool,
        recipe: Recipe,
    ) -> Result<Realm, SandboxError> {
        let context = Context::full(&self.runtime)
            .map_err(|error| SandboxError::engine(format!("cannot create realm: {error}")))?;
        let logs = LogSink::new(extension, capture);
        context.with(|ctx| {
            install_host(&ctx, &logs, extension).map_err(|error| {
                SandboxError::engine(format!(
                    "cannot install realm prelude: {}",
                    failure_text(&ctx, &error).0
                ))
            })
        })?;
        Ok(Realm {
            context,
            logs,
            recipe,
        })
    }

    fn settle(&self, context: &Context, extension: &str, task: &str) -> Result<Value, SandboxError> {
        loop {
            self.run_pending_jobs(extension)?;
            let text = context.with(|ctx| {
                control(&ctx, "take")
                    .and_then(|take| take.call::<_, String>((task.to_owned(),)))
                    .map_err(|error| self.script_failure(&ctx, extension, &error))
            })?;
            let state: TaskState = serde_json::from_str(&text).map_err(|error| {
                SandboxError::protocol(format!("malformed task state: {error}"))
            })?;
            match state {
                TaskState::Pending => {
                    if self.deadline.expired() {
                        return Err(self.timeout(extension));
                    }
                    thread::sleep(IDLE_POLL);
                }
                TaskState::Resolved { value } => return Ok(value),
                TaskState::Rejected { error } => return Err(error.into_error(extension)),
                TaskState::Missing => {
                    return Err(SandboxError::protocol(format!(
                        "task {task} is unknown to the realm"
                    )));
                }
            }
        }
    }

    fn run_pending_jobs(&self, extension: &str) -> Result<(), SandboxError> {
        loop {
            if self.deadline.expired() {
                return Err(self.timeout(extension));
            }
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(_) if self.deadline.expired() => return Err(self.timeout(extension)),
                Err(_) => {
                    debug!(target: ISOLATE_TARGET, extension, "pending job raised an uncaught exception");
                }
            }
        }
    }

    fn script_failure(&self, ctx: &Ctx<'_>, extension: &str, error: &rquickjs::Error) -> SandboxError {
        if self.deadline.expired() {
            return self.timeout(extension);
        }
        let (message, stack) = failure_text(ctx, error);
        SandboxError::Evaluation {
            extension: extension.to_owned(),
            message,
            stack,
            logs: Vec::new(),
        }
    }

    /// Clears work left behind by a timed-out task. Jobs run with an
    /// already expired deadline so loops are interrupted at once; a queue
    /// that still refuses to drain forces a runtime rebuild.
    fn recover_if_timed_out<T>(&mut self, outcome: &Result<T, SandboxError>) {
        if !matches!(outcome, Err(error) if error.is_timeout()) {
            return;
        }
        self.deadline.expire_now();
        let drained = (0..PURGE_LIMIT).any(|_| matches!(self.runtime.execute_pending_job(), Ok(false)));
        self.deadline.disarm();
        if drained {
            return;
        }
        warn!(
            target: ISOLATE_TARGET,
            realms = self.realms.len(),
            "job queue did not drain after a timeout; rebuilding the engine"
        );
        if let Err(error) = self.rebuild() {
            error!(target: ISOLATE_TARGET, error = %error, "engine rebuild failed");
        }
    }

    fn rebuild(&mut self) -> Result<(), SandboxError> {
        let recipes: Vec<(String, Recipe)> = self
            .realms
            .drain()
            .map(|(extension, realm)| (extension, realm.recipe))
            .collect();
        let (runtime, modules) = start_runtime(&self.profile, &self.deadline)?;
        self.runtime = runtime;
        self.modules = modules;
        for (extension, recipe) in recipes {
            if let Err(error) = self.evaluate_once(&extension, recipe) {
                warn!(
                    target: ISOLATE_TARGET,
                    extension,
                    error = %error,
                    "realm could not be restored after rebuild"
                );
            }
        }
        Ok(())
    }
}

fn start_runtime(
    profile: &SandboxProfile,
    deadline: &Deadline,
) -> Result<(Runtime, ModuleTable), SandboxError> {
    let runtime = Runtime::new()
        .map_err(|error| SandboxError::engine(format!("cannot start engine: {error}")))?;
    runtime.set_memory_limit(profile.memory_limit());
    runtime.set_max_stack_size(profile.max_stack_size());
    let watched = deadline.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || watched.expired())));
    let modules = ModuleTable::default();
    runtime.set_loader(
        BundleResolver::new(modules.clone()),
        BundleLoader::new(modules.clone()),
    );
    Ok((runtime, modules))
}

fn install_host(ctx: &Ctx<'_>, logs: &LogSink, extension: &str) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let sink = logs.clone();
    globals.set(
        "__spindle_log",
        Function::new(ctx.clone(), move |method: String, message: String| {
            sink.record(&method, message);
        })?,
    )?;

    let owner = extension.to_owned();
    globals.set(
        "__spindle_inspect",
        Function::new(ctx.clone(), move |label: String, payload: String| {
            debug!(target: INSPECT_TARGET, extension = %owner, label, payload, "inspect");
        })?,
    )?;

    ctx.eval::<(), _>(PRELUDE)
}

fn control<'js>(ctx: &Ctx<'js>, method: &str) -> rquickjs::Result<Function<'js>> {
    let control: Object<'js> = ctx.globals().get(CONTROL_GLOBAL)?;
    control.get(method)
}

/// Extracts message and stack from a failed engine call.
fn failure_text(ctx: &Ctx<'_>, error: &rquickjs::Error) -> (String, Option<String>) {
    if !error.is_exception() {
        return (error.to_string(), None);
    }
    let thrown = ctx.catch();
    let message = thrown
        .get::<Coerced<String>>()
        .map_or_else(|_| String::from("uncaught exception"), |text| text.0);
    let stack = thrown
        .as_object()
        .and_then(|object| object.get::<_, Option<String>>("stack").ok().flatten())
        .filter(|stack| !stack.trim().is_empty());
    (message, stack)
}

fn debug_enabled(metadata: &Value) -> bool {
    metadata
        .get("debug")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
