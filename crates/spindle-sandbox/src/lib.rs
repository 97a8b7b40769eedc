//! Isolated execution of JavaScript extensions.
//!
//! The `spindle-sandbox` crate runs untrusted extension source inside an
//! embedded QuickJS engine hosted on dedicated worker threads. Callers
//! describe the limits of every request with a [`SandboxProfile`], declare
//! third-party packages with a [`DependencyManifest`] and talk to the
//! engine through the [`ExtensionExecutor`] trait.
//!
//! The sandbox is intentionally narrow:
//! - Extension realms see no filesystem, network, process or environment
//!   APIs. Only `module`, `exports`, `deps`, `extension`, `registerHook`,
//!   `unregisterHook`, `console` and `inspect` are provided.
//! - Each extension evaluates in its own realm; globals never leak between
//!   extensions.
//! - Every request runs under a deadline. Busy loops are interrupted and
//!   promises that never settle are abandoned, leaving the worker usable.
//! - Dependencies are bundled once per `name@version` by a shared
//!   [`DependencyBundler`] and served to the engine from memory.
//!
//! ```rust,no_run
//! use spindle_sandbox::{
//!     DependencyBundler, EvaluationRequest, ExtensionExecutor, SandboxProfile, WorkerPool,
//! };
//!
//! # async fn demo() -> Result<(), spindle_sandbox::SandboxError> {
//! let bundler = DependencyBundler::from_directory("/opt/spindle/packages");
//! let pool = WorkerPool::spawn(2, &SandboxProfile::new(), &bundler)?;
//!
//! let request = EvaluationRequest::new("math", "module.exports = { add: (a, b) => a + b };");
//! pool.evaluate(request).await?;
//! let sum = pool.invoke("math", "add", vec![2.into(), 3.into()]).await?;
//! assert_eq!(sum.value, 5);
//! # Ok(()) }
//! ```

pub mod bundler;
mod error;
mod executor;
mod isolate;
mod pool;
mod profile;
pub mod protocol;
mod worker;

#[cfg(test)]
mod tests;

pub use self::bundler::{
    Bundle, DependencyBundler, DependencyManifest, DirectoryPackageSource, ModuleHandle,
    PackageLocation, PackageSource,
};
pub use self::error::{DependencyResolutionError, SandboxError};
pub use self::executor::{EvaluationRequest, ExtensionExecutor};
pub use self::pool::WorkerPool;
pub use self::profile::{
    ConsolePolicy, DEFAULT_MAX_STACK_SIZE, DEFAULT_MEMORY_LIMIT, DEFAULT_TIMEOUT, SandboxProfile,
};
pub use self::protocol::{DebugLogEntry, EvaluationReport, HookDescriptor, LogLevel, Output};
pub use self::worker::Worker;
