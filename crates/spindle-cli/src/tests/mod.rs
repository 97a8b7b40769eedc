//! Unit tests for argument handling and in-process command dispatch.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rstest::{fixture, rstest};
use spindle_config::{Config, ConfigError};
use tempfile::TempDir;

use crate::commands::parse_dependencies;
use crate::config::ConfigLoader;
use crate::errors::AppError;
use crate::{run, run_with_loader};

struct Captured {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

fn argv(args: &[&str]) -> Vec<OsString> {
    std::iter::once("spindle")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn captured(exit: ExitCode, stdout: Vec<u8>, stderr: Vec<u8>) -> Captured {
    Captured {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

fn invoke(args: &[&str]) -> Captured {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run(argv(args), &mut stdout, &mut stderr);
    captured(exit, stdout, stderr)
}

fn invoke_with(args: &[&str], loader: &RecordingLoader) -> Captured {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run_with_loader(argv(args), &mut stdout, &mut stderr, loader);
    captured(exit, stdout, stderr)
}

/// Remembers the arguments it was handed and rejects them.
struct RecordingLoader {
    seen: RefCell<Vec<OsString>>,
}

impl RecordingLoader {
    fn failing() -> Self {
        Self {
            seen: RefCell::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen
            .borrow()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}

impl ConfigLoader for RecordingLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        self.seen.replace(args.to_vec());
        Err(AppError::LoadConfiguration(ConfigError::Invalid {
            field: "sandbox_timeout_ms",
            message: String::from("rejected by test loader"),
        }))
    }
}

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn write(&self, name: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, source).expect("write source");
        path
    }

    fn config_arg(&self) -> &str {
        self.config.to_str().expect("utf8 path")
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().expect("temp dir");
    let config = dir.path().join("spindle.toml");
    fs::write(&config, "log_filter = \"off\"\n").expect("write config");
    Workspace { dir, config }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[rstest]
#[case("excel-document", "excel")]
#[case("show-chart", "showChart")]
#[case("web-search", "webSearch")]
fn namespace_command_prints_the_resolved_name(#[case] id: &str, #[case] expected: &str) {
    let captured = invoke(&["namespace", id]);
    assert_eq!(captured.exit, ExitCode::SUCCESS);
    assert_eq!(captured.stdout.trim_end(), expected);
    assert!(captured.stderr.is_empty());
}

#[rstest]
fn docs_command_infers_functions_without_evaluating(workspace: Workspace) {
    let file = workspace.write(
        "web-search.js",
        "module.exports = {\n  search: async (query, limit) => [],\n};\n",
    );

    let captured = invoke(&[
        "--config-path",
        workspace.config_arg(),
        "docs",
        path_arg(&file),
        "--name",
        "Web Search",
    ]);

    assert_eq!(captured.exit, ExitCode::SUCCESS, "stderr: {}", captured.stderr);
    assert!(captured.stdout.starts_with("### Web Search"));
    assert!(captured.stdout.contains("**ID**: `web-search`"));
    assert!(captured.stdout.contains("- `webSearch.search(query, limit)`"));
}

#[rstest]
fn missing_source_files_are_reported(workspace: Workspace) {
    let missing = workspace.dir.path().join("absent.js");
    let captured = invoke(&[
        "--config-path",
        workspace.config_arg(),
        "docs",
        path_arg(&missing),
    ]);

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert!(captured.stderr.contains("failed to read extension source"));
    assert!(captured.stdout.is_empty());
}

#[rstest]
fn invalid_configuration_stops_before_any_command(workspace: Workspace) {
    fs::write(&workspace.config, "sandbox_workers = 0\n").expect("write config");
    let file = workspace.write("notes.js", "module.exports = {};");

    let captured = invoke(&[
        "--config-path",
        workspace.config_arg(),
        "docs",
        path_arg(&file),
    ]);

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert!(captured.stderr.contains("sandbox_workers"));
}

#[rstest]
fn leading_config_flags_reach_the_loader(workspace: Workspace) {
    let file = workspace.write("notes.js", "module.exports = {};");
    let loader = RecordingLoader::failing();

    let captured = invoke_with(
        &[
            "--config-path",
            workspace.config_arg(),
            "--sandbox-timeout-ms=250",
            "docs",
            path_arg(&file),
        ],
        &loader,
    );

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert!(captured.stderr.contains("sandbox_timeout_ms"));
    assert_eq!(
        loader.seen(),
        vec![
            String::from("spindle"),
            String::from("--config-path"),
            workspace.config_arg().to_owned(),
            String::from("--sandbox-timeout-ms=250"),
        ]
    );
}

#[test]
fn namespace_command_never_loads_configuration() {
    let loader = RecordingLoader::failing();
    let captured = invoke_with(&["--log-filter", "debug", "namespace", "web-search"], &loader);

    assert_eq!(captured.exit, ExitCode::SUCCESS);
    assert_eq!(captured.stdout.trim_end(), "webSearch");
    assert!(loader.seen().is_empty());
}

#[test]
fn config_flags_after_the_subcommand_are_usage_errors() {
    let captured = invoke(&["namespace", "web-search", "--sandbox-workers", "2"]);
    assert_eq!(captured.exit, ExitCode::from(2));
}

#[test]
fn usage_errors_exit_with_status_two() {
    let captured = invoke(&["run"]);
    assert_eq!(captured.exit, ExitCode::from(2));
    assert!(captured.stderr.contains("Usage: spindle run"));
}

#[test]
fn help_is_written_to_stdout() {
    let captured = invoke(&["--help"]);
    assert_eq!(captured.exit, ExitCode::SUCCESS);
    assert!(captured.stdout.contains("namespace"));
    assert!(captured.stdout.contains("trigger"));
    assert!(captured.stderr.is_empty());
}

#[rstest]
#[case(&["lodash@4.17.21"], &[("lodash", "4.17.21")])]
#[case(&["@scope/pkg@^1.2.0"], &[("@scope/pkg", "^1.2.0")])]
#[case(&[], &[])]
fn dependencies_parse_at_the_last_at_sign(
    #[case] specs: &[&str],
    #[case] expected: &[(&str, &str)],
) {
    let owned: Vec<String> = specs.iter().map(|spec| (*spec).to_owned()).collect();
    let manifest = parse_dependencies(&owned).expect("valid specs");
    let pairs: Vec<(&str, &str)> = manifest.iter().collect();
    assert_eq!(pairs, expected);
}

#[rstest]
#[case("lodash")]
#[case("lodash@")]
#[case("@4.0.0")]
fn malformed_dependencies_are_rejected(#[case] spec: &str) {
    let result = parse_dependencies(&[spec.to_owned()]);
    assert!(matches!(result, Err(AppError::InvalidDependency(text)) if text == spec));
}
