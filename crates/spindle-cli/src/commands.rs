//! Subcommand implementations.
//!
//! Every command reads extension sources from disk, so no persistent store
//! is involved: each invocation seeds an [`InMemoryExtensionStore`] and
//! drives an [`ExtensionHost`] over a worker pool built from [`Config`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use spindle_config::Config;
use spindle_extensions::{
    Extension, ExtensionHost, ExtensionStore, InMemoryExtensionStore, Namespace, generate,
};
use spindle_sandbox::{
    DebugLogEntry, DependencyBundler, DependencyManifest, DirectoryPackageSource,
    EvaluationReport, LogLevel, SandboxProfile, WorkerPool,
};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::cli::SourceArgs;
use crate::errors::AppError;

const CLI_TARGET: &str = "spindle_cli";

/// Summary printed by `run` when no function is called.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadReport<'a> {
    id: &'a str,
    namespace: &'a Namespace,
    #[serde(flatten)]
    report: &'a EvaluationReport,
}

/// Streams handed to every command.
pub(crate) struct Streams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<W: Write, E: Write> Streams<'_, W, E> {
    fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), AppError> {
        serde_json::to_writer_pretty(&mut *self.stdout, value).map_err(AppError::Serialise)?;
        writeln!(self.stdout)?;
        Ok(())
    }

    fn debug_logs(&mut self, logs: &[DebugLogEntry]) -> Result<(), AppError> {
        for entry in logs {
            writeln!(self.stderr, "[{}] {}", level_label(entry.level), entry.message)?;
        }
        Ok(())
    }
}

const fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Log => "log",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// `spindle namespace <ID>`
pub(crate) fn namespace<W: Write, E: Write>(
    id: &str,
    streams: &mut Streams<'_, W, E>,
) -> Result<(), AppError> {
    writeln!(streams.stdout, "{}", Namespace::for_extension(id))?;
    Ok(())
}

/// `spindle docs <FILE>`
pub(crate) fn docs<W: Write, E: Write>(
    config: &Config,
    source: &SourceArgs,
    evaluate: bool,
    streams: &mut Streams<'_, W, E>,
) -> Result<(), AppError> {
    let extension = read_extension(source)?;
    if !evaluate {
        writeln!(streams.stdout, "{}", generate(&extension))?;
        return Ok(());
    }

    let id = extension.id().to_owned();
    let session = Session::start(config, [extension])?;
    let text = session.runtime.block_on(async {
        session.host.load(&id).await?;
        session.host.context_documentation().await
    })?;
    writeln!(streams.stdout, "{text}")?;
    Ok(())
}

/// `spindle run <FILE>`
pub(crate) fn run<W: Write, E: Write>(
    config: &Config,
    source: &SourceArgs,
    call: Option<&str>,
    raw_args: &[String],
    streams: &mut Streams<'_, W, E>,
) -> Result<(), AppError> {
    let args = raw_args
        .iter()
        .map(|raw| {
            serde_json::from_str::<Value>(raw).map_err(|source| AppError::InvalidJson {
                what: "--arg",
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let extension = read_extension(source)?;
    let id = extension.id().to_owned();
    let session = Session::start(config, [extension])?;

    let result = session.runtime.block_on(async {
        let outcome = session.host.load(&id).await?;
        match call {
            Some(function) => {
                let value = session
                    .host
                    .call(outcome.namespace.as_str(), function, args)
                    .await?;
                streams.json(&value)
            }
            None => streams.json(&LoadReport {
                id: &id,
                namespace: &outcome.namespace,
                report: &outcome.report,
            }),
        }
    });

    if source.debug {
        let record = session.runtime.block_on(session.store.get(&id));
        if let Ok(stored) = record {
            streams.debug_logs(stored.debug_logs())?;
        }
    }
    result
}

/// `spindle trigger <HOOK> <FILE>...`
pub(crate) fn trigger<W: Write, E: Write>(
    config: &Config,
    hook_type: &str,
    raw_context: &str,
    files: &[PathBuf],
    streams: &mut Streams<'_, W, E>,
) -> Result<(), AppError> {
    let context: Value =
        serde_json::from_str(raw_context).map_err(|source| AppError::InvalidJson {
            what: "--context",
            source,
        })?;
    let extensions = files
        .iter()
        .map(|file| extension_from_file(file, None, None))
        .collect::<Result<Vec<_>, _>>()?;
    let total = extensions.len();
    let session = Session::start(config, extensions)?;

    let (summary, outcome) = session.runtime.block_on(async {
        let loaded = session.host.load_all().await?;
        let fired = session.host.trigger(hook_type, &context).await;
        Ok::<_, AppError>((loaded, fired))
    })?;

    for (id, error) in &summary.failed {
        writeln!(streams.stderr, "{id}: {error}")?;
    }
    for failure in &outcome.failures {
        writeln!(streams.stderr, "{failure}")?;
    }
    streams.json(&outcome.merged())?;

    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(AppError::PartialLoad {
            failed: summary.failed.len(),
            total,
        })
    }
}

struct Session {
    runtime: Runtime,
    store: Arc<InMemoryExtensionStore>,
    host: ExtensionHost,
}

impl Session {
    fn start(
        config: &Config,
        extensions: impl IntoIterator<Item = Extension>,
    ) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(AppError::Runtime)?;
        let pool = worker_pool(config)?;
        let store = Arc::new(InMemoryExtensionStore::with_extensions(extensions));
        let host = ExtensionHost::new(store.clone(), Arc::new(pool));
        Ok(Self {
            runtime,
            store,
            host,
        })
    }
}

fn worker_pool(config: &Config) -> Result<WorkerPool, AppError> {
    let mut profile = SandboxProfile::new()
        .with_timeout(config.sandbox_timeout())
        .with_memory_limit(config.sandbox_memory_limit_bytes)
        .with_max_stack_size(config.sandbox_max_stack_bytes);
    if !config.sandbox_capture_console {
        profile = profile.discard_console();
    }
    let packages = Arc::new(DirectoryPackageSource::new(config.packages_root.clone()));
    let bundler = DependencyBundler::with_staging_dir(packages, config.packages_staging_dir.clone());

    let pool =
        WorkerPool::spawn(config.sandbox_workers, &profile, &bundler).map_err(AppError::Workers)?;
    info!(
        target: CLI_TARGET,
        workers = pool.len(),
        timeout_ms = config.sandbox_timeout_ms,
        "execution workers ready"
    );
    Ok(pool)
}

fn read_extension(source: &SourceArgs) -> Result<Extension, AppError> {
    let extension = extension_from_file(&source.file, source.id.as_deref(), source.name.as_deref())?
        .with_debug(source.debug);
    let manifest = parse_dependencies(&source.dependencies)?;
    if manifest.is_empty() {
        return Ok(extension);
    }
    Ok(extension.with_backend_dependencies(manifest))
}

fn extension_from_file(
    file: &Path,
    explicit_id: Option<&str>,
    explicit_name: Option<&str>,
) -> Result<Extension, AppError> {
    let code = fs::read_to_string(file).map_err(|source| AppError::ReadSource {
        path: file.to_path_buf(),
        source,
    })?;
    let id = match explicit_id {
        Some(given) => given.to_owned(),
        None => file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_owned)
            .ok_or_else(|| AppError::MissingId(file.to_path_buf()))?,
    };
    let name = explicit_name.map_or_else(|| id.clone(), str::to_owned);
    debug!(target: CLI_TARGET, extension = %id, path = %file.display(), "read extension source");
    Ok(Extension::new(id, name, code))
}

/// Parses `name@version` pairs. The split happens at the last `@` so scoped
/// package names keep their leading `@`.
pub(crate) fn parse_dependencies(specs: &[String]) -> Result<DependencyManifest, AppError> {
    specs
        .iter()
        .map(|spec| match spec.rsplit_once('@') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok((name, version))
            }
            _ => Err(AppError::InvalidDependency(spec.clone())),
        })
        .collect()
}
