//! Dependency bundling with a `name@version` keyed cache.
//!
//! [`DependencyBundler::resolve`] turns a [`DependencyManifest`] into a
//! [`Bundle`] of loadable [`ModuleHandle`]s. Each package is materialised at
//! most once per bundler: hits are served from the cache and concurrent
//! requests for the same package await one shared in-flight future. A
//! manifest either resolves completely or fails with the first
//! [`DependencyResolutionError`]; partial bundles are never returned.
//!
//! Materialisation writes a re-export entry module into a transient staging
//! directory which is removed whether or not the package loads.

mod graph;
mod source;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DependencyResolutionError;

pub use source::{DirectoryPackageSource, PackageLocation, PackageSource};

const BUNDLER_TARGET: &str = "spindle_sandbox::bundler";

/// Returns the cache key for a package.
#[must_use]
pub fn package_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Mapping of package name to requested version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest(BTreeMap<String, String>);

impl DependencyManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a package requirement.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.0.insert(name.into(), version.into());
        self
    }

    /// Returns the requested version of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterates over `(name, version)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    /// Returns the number of declared packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no packages are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the sorted-JSON rendering used to identify a manifest.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DependencyManifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, version)| (name.into(), version.into()))
                .collect(),
        )
    }
}

/// A loaded package: its virtual module table and entry specifier.
///
/// Handles are cheap to clone and immutable once built.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<PackageModules>,
}

struct PackageModules {
    name: String,
    version: String,
    entry: String,
    modules: BTreeMap<String, String>,
}

impl ModuleHandle {
    /// Builds a handle from an already materialised module table.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        entry: impl Into<String>,
        modules: BTreeMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(PackageModules {
                name: name.into(),
                version: version.into(),
                entry: entry.into(),
                modules,
            }),
        }
    }

    /// Returns the package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the resolved version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Returns the `name@version` cache key.
    #[must_use]
    pub fn key(&self) -> String {
        package_key(&self.inner.name, &self.inner.version)
    }

    /// Returns the specifier of the re-export entry module.
    #[must_use]
    pub fn entry_specifier(&self) -> &str {
        &self.inner.entry
    }

    /// Returns every module of the package keyed by virtual specifier.
    #[must_use]
    pub fn modules(&self) -> &BTreeMap<String, String> {
        &self.inner.modules
    }

    /// Returns `true` when both handles share the same loaded package.
    #[must_use]
    pub fn same_load(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("key", &self.key())
            .field("entry", &self.inner.entry)
            .field("modules", &self.inner.modules.len())
            .finish()
    }
}

/// Resolved dependencies keyed by declared package name.
pub type Bundle = BTreeMap<String, ModuleHandle>;

type PendingLoad = Shared<BoxFuture<'static, Result<ModuleHandle, DependencyResolutionError>>>;

#[derive(Default)]
struct CacheState {
    loaded: HashMap<String, ModuleHandle>,
    in_flight: HashMap<String, PendingLoad>,
}

struct BundlerInner {
    source: Arc<dyn PackageSource>,
    staging_dir: Option<PathBuf>,
    state: Mutex<CacheState>,
    builds: AtomicUsize,
}

impl BundlerInner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves manifests into bundles, caching packages by `name@version`.
///
/// The cache lives as long as the bundler. Clones share the same cache, so a
/// bundler handed to several workers in one process loads each package once.
/// Separate processes never share a cache.
#[derive(Clone)]
pub struct DependencyBundler {
    inner: Arc<BundlerInner>,
}

impl fmt::Debug for DependencyBundler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyBundler")
            .field("staging_dir", &self.inner.staging_dir)
            .field("cached", &self.cached_len())
            .field("builds", &self.bundles_built())
            .finish_non_exhaustive()
    }
}

impl DependencyBundler {
    /// Creates a bundler over `source`, staging entry modules in the system
    /// temporary directory.
    #[must_use]
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self::with_staging_dir(source, None)
    }

    /// Creates a bundler that stages entry modules below `staging_dir`.
    #[must_use]
    pub fn with_staging_dir(source: Arc<dyn PackageSource>, staging_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(BundlerInner {
                source,
                staging_dir,
                state: Mutex::new(CacheState::default()),
                builds: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a bundler reading packages from a directory tree.
    #[must_use]
    pub fn from_directory(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectoryPackageSource::new(root)))
    }

    /// Resolves every package of `manifest`.
    ///
    /// # Errors
    ///
    /// Returns the first [`DependencyResolutionError`] raised by any package;
    /// successfully loaded siblings stay cached but no bundle is returned.
    pub async fn resolve(
        &self,
        manifest: &DependencyManifest,
    ) -> Result<Bundle, DependencyResolutionError> {
        if manifest.is_empty() {
            return Ok(Bundle::new());
        }
        let started = Instant::now();
        let loads = manifest
            .iter()
            .map(|(name, version)| self.resolve_package(name, version));
        let handles = try_join_all(loads).await.inspect_err(|error| {
            warn!(
                target: BUNDLER_TARGET,
                manifest = %manifest.canonical_key(),
                dependency = error.dependency(),
                error = %error,
                "manifest resolution failed"
            );
        })?;
        debug!(
            target: BUNDLER_TARGET,
            manifest = %manifest.canonical_key(),
            elapsed_ms = elapsed_ms(started),
            "manifest resolved"
        );
        Ok(manifest
            .iter()
            .map(|(name, _)| name.to_owned())
            .zip(handles)
            .collect())
    }

    /// Returns how many packages this bundler has materialised.
    #[must_use]
    pub fn bundles_built(&self) -> usize {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// Returns `true` when `name@version` is cached.
    #[must_use]
    pub fn is_cached(&self, name: &str, version: &str) -> bool {
        self.inner
            .state()
            .loaded
            .contains_key(&package_key(name, version))
    }

    /// Drops every cached handle. In-flight loads finish normally.
    pub fn clear(&self) {
        let mut state = self.inner.state();
        let dropped = state.loaded.len();
        state.loaded.clear();
        debug!(target: BUNDLER_TARGET, dropped, "dependency cache cleared");
    }

    fn cached_len(&self) -> usize {
        self.inner.state().loaded.len()
    }

    async fn resolve_package(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModuleHandle, DependencyResolutionError> {
        let key = package_key(name, version);
        let pending = {
            let mut state = self.inner.state();
            if let Some(handle) = state.loaded.get(&key) {
                debug!(target: BUNDLER_TARGET, dependency = %key, "dependency cache hit");
                return Ok(handle.clone());
            }
            if let Some(pending) = state.in_flight.get(&key) {
                debug!(target: BUNDLER_TARGET, dependency = %key, "awaiting in-flight load");
                pending.clone()
            } else {
                let pending = self.start_load(key.clone(), name.to_owned(), version.to_owned());
                state.in_flight.insert(key, pending.clone());
                pending
            }
        };
        pending.await
    }

    fn start_load(&self, key: String, name: String, version: String) -> PendingLoad {
        let inner = Arc::clone(&self.inner);
        async move {
            let outcome = load_package(&inner, &key, &name, &version).await;
            let mut state = inner.state();
            state.in_flight.remove(&key);
            if let Ok(handle) = &outcome {
                state.loaded.insert(key, handle.clone());
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

async fn load_package(
    inner: &BundlerInner,
    key: &str,
    name: &str,
    version: &str,
) -> Result<ModuleHandle, DependencyResolutionError> {
    let started = Instant::now();
    let location = inner.source.locate(name, version).await?;

    let staging_dir = inner.staging_dir.clone();
    let owned_key = key.to_owned();
    let materialized = tokio::task::spawn_blocking(move || {
        stage_and_materialize(&owned_key, &location, staging_dir.as_deref())
    })
    .await
    .map_err(|error| {
        DependencyResolutionError::new(key, format!("bundling task failed: {error}"))
    })??;

    inner.builds.fetch_add(1, Ordering::SeqCst);
    info!(
        target: BUNDLER_TARGET,
        dependency = key,
        modules = materialized.modules.len(),
        elapsed_ms = elapsed_ms(started),
        "dependency bundled"
    );
    Ok(ModuleHandle::new(
        name,
        version,
        materialized.entry,
        materialized.modules,
    ))
}

fn stage_and_materialize(
    key: &str,
    location: &PackageLocation,
    staging_dir: Option<&Path>,
) -> Result<graph::Materialized, DependencyResolutionError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("spindle-bundle-");
    let staging = match staging_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|error| DependencyResolutionError::io(key, "cannot create staging directory", error))?;

    let outcome = graph::materialize(key, location, staging.path());
    let path = staging.path().to_path_buf();
    if let Err(error) = staging.close() {
        warn!(
            target: BUNDLER_TARGET,
            dependency = key,
            path = %path.display(),
            error = %error,
            "failed to remove staging directory"
        );
    }
    outcome
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
