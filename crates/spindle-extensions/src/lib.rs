//! Extension orchestration for Spindle.
//!
//! The `spindle-extensions` crate turns stored extension records into
//! callable namespaces. It sits above `spindle-sandbox`: the sandbox runs
//! code, this crate decides what is loaded, under which name, and which
//! lifecycle events it participates in.
//!
//! # Architecture
//!
//! - [`namespace`] maps an extension id to the namespace callers use.
//! - [`hooks`] keeps the lifecycle hook table and merges handler results.
//! - [`docs`] derives LLM-facing markdown describing each extension.
//! - [`ExtensionLoader`] evaluates an [`Extension`] through any
//!   [`spindle_sandbox::ExtensionExecutor`] and registers it only when
//!   evaluation succeeds.
//! - [`ExtensionHost`] reads records from an [`ExtensionStore`], drives the
//!   loader and writes error history back.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use spindle_extensions::{Extension, ExtensionHost, InMemoryExtensionStore};
//! use spindle_sandbox::{DependencyBundler, SandboxProfile, Worker};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryExtensionStore::with_extensions([Extension::new(
//!     "web-search",
//!     "Web Search",
//!     "module.exports = { search: async (query) => [query] };",
//! )]));
//! let bundler = DependencyBundler::from_directory("/var/lib/spindle/packages");
//! let worker = Worker::spawn(0, SandboxProfile::new(), bundler)?;
//!
//! let host = ExtensionHost::new(store, Arc::new(worker));
//! host.load_all().await?;
//! let hits = host.call("webSearch", "search", vec!["rust".into()]).await?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub mod docs;
mod error;
pub mod hooks;
mod host;
mod loader;
pub mod namespace;
mod record;
mod store;

#[cfg(test)]
mod tests;

pub use self::docs::{DocExample, FunctionSignature, generate, generate_with_exports};
pub use self::error::{ExtensionError, HookHandlerError, StoreError};
pub use self::hooks::{HookHandler, HookOutcome, HookRegistry};
pub use self::host::{CONTEXT_SEPARATOR, ExtensionHost, LoadSummary};
pub use self::loader::{ExtensionLoader, LoadOutcome, LoadedExtension};
pub use self::namespace::Namespace;
pub use self::record::{Extension, ExtensionDependencies, ExtensionMetadata, MAX_DEBUG_LOGS};
pub use self::store::{ExtensionStore, InMemoryExtensionStore};
