//! Integration tests for configuration layering.
//!
//! Loading reads the process environment, so every test holds `ENV_MUTEX`
//! while it runs.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tempfile::TempDir;

use spindle_config::{CONFIG_PATH_ENV, Config, ConfigError, DEFAULT_TIMEOUT_MS, LogFormat};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Variables that could leak into a load from the surrounding shell.
const SPINDLE_VARS: &[&str] = &[
    CONFIG_PATH_ENV,
    "SPINDLE_LOG_FILTER",
    "SPINDLE_LOG_FORMAT",
    "SPINDLE_SANDBOX_TIMEOUT_MS",
    "SPINDLE_SANDBOX_WORKERS",
    "SPINDLE_PACKAGES_ROOT",
];

/// Serialises access to the environment and restores it on drop.
struct Environment {
    saved: Vec<(&'static str, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl Environment {
    fn isolated() -> Self {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let saved = SPINDLE_VARS
            .iter()
            .map(|key| (*key, std::env::var_os(key)))
            .collect();
        for key in SPINDLE_VARS {
            // Edition 2024 marks environment mutation as unsafe; the mutex
            // keeps other tests in this binary from observing it.
            unsafe { std::env::remove_var(key) };
        }
        Self {
            saved,
            _guard: guard,
        }
    }

    fn set(&self, key: &str, value: impl AsRef<std::ffi::OsStr>) {
        assert!(SPINDLE_VARS.contains(&key), "{key} is not restored on drop");
        unsafe { std::env::set_var(key, value) };
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(previous) => unsafe { std::env::set_var(key, previous) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

fn write_config(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("spindle.toml");
    fs::write(&path, text).expect("write configuration");
    path
}

fn args(extra: &[&str]) -> Vec<OsString> {
    std::iter::once("spindle")
        .chain(extra.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_path_args(path: &Path, extra: &[&str]) -> Vec<OsString> {
    let mut all = args(&["--config-path"]);
    all.push(path.as_os_str().to_owned());
    all.extend(extra.iter().map(OsString::from));
    all
}

#[test]
fn file_values_override_defaults() {
    let _env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        &dir,
        "log_filter = \"debug\"\nsandbox_timeout_ms = 750\nsandbox_workers = 3\n",
    );

    let config = Config::resolve(config_path_args(&path, &[])).expect("load");
    assert_eq!(config.log_filter(), "debug");
    assert_eq!(config.sandbox_timeout_ms, 750);
    assert_eq!(config.sandbox_workers, 3);
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[test]
fn environment_overrides_single_fields_of_the_file() {
    let env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "sandbox_timeout_ms = 750\nsandbox_workers = 3\n");
    env.set("SPINDLE_SANDBOX_TIMEOUT_MS", "1200");

    let config = Config::resolve(config_path_args(&path, &[])).expect("load");
    assert_eq!(config.sandbox_timeout_ms, 1200);
    assert_eq!(config.sandbox_workers, 3);
}

#[test]
fn flags_beat_environment_and_file() {
    let env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "log_format = \"compact\"\nsandbox_timeout_ms = 750\n");
    env.set("SPINDLE_SANDBOX_TIMEOUT_MS", "1200");
    env.set("SPINDLE_LOG_FORMAT", "compact");

    let packages = dir.path().to_string_lossy().into_owned();
    let config = Config::resolve(config_path_args(
        &path,
        &[
            "--sandbox-timeout-ms",
            "100",
            "--log-format",
            "json",
            "--packages-root",
            &packages,
        ],
    ))
    .expect("load");
    assert_eq!(config.sandbox_timeout_ms, 100);
    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.packages_root(), dir.path());
}

#[test]
fn config_path_variable_selects_the_file() {
    let env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "sandbox_workers = 4\n");
    env.set(CONFIG_PATH_ENV, &path);

    let config = Config::resolve(args(&[])).expect("load");
    assert_eq!(config.sandbox_workers, 4);
    assert_eq!(config.sandbox_timeout_ms, DEFAULT_TIMEOUT_MS);
}

#[test]
fn merged_values_are_validated() {
    let env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "");
    env.set("SPINDLE_SANDBOX_WORKERS", "0");

    let error = Config::resolve(config_path_args(&path, &[])).expect_err("must fail");
    assert!(
        matches!(error, ConfigError::Invalid { field: "sandbox_workers", .. }),
        "got {error}"
    );
}

#[test]
fn malformed_files_are_load_errors() {
    let _env = Environment::isolated();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "sandbox_timeout_ms = \n");

    let error = Config::resolve(config_path_args(&path, &[])).expect_err("must fail");
    assert!(matches!(error, ConfigError::Load(_)), "got {error}");
}
