//! Configuration loading helpers for the spindle CLI.
//!
//! Configuration flags lead the command line. They are split off here and
//! handed to `ortho_config`, which layers them over the configuration file
//! and `SPINDLE_*` environment variables; the remaining tokens form the
//! subcommand that clap parses.

use std::ffi::{OsStr, OsString};

use spindle_config::Config;

use crate::AppError;

/// CLI flags recognised by the configuration loader. Each takes a value.
///
/// Keep in sync with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--sandbox-timeout-ms",
    "--sandbox-memory-limit-bytes",
    "--sandbox-max-stack-bytes",
    "--sandbox-workers",
    "--packages-root",
    "--packages-staging-dir",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration for the CLI.
    ///
    /// `args` holds the program name followed by configuration flags only.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Loads through [`Config::resolve`].
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::resolve(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Configuration arguments and where the subcommand begins.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

/// Collects the leading configuration flags of `args`.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut pending_value = false;
    for argument in rest {
        if pending_value {
            pending_value = false;
        } else {
            match classify(argument) {
                FlagAction::Include { needs_value } => pending_value = needs_value,
                FlagAction::Stop => break,
            }
        }
        config_arguments.push(argument.clone());
    }

    let command_start = config_arguments.len();
    ConfigArgumentSplit {
        config_arguments,
        command_start,
    }
}

/// Program name followed by everything after the configuration flags.
pub(crate) fn command_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.get(split.command_start..).unwrap_or_default())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case("--log-filter", FlagAction::Include { needs_value: true })]
    #[case("run", FlagAction::Stop)]
    #[case("--call", FlagAction::Stop)]
    fn flags_are_classified(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(argument)), expected);
    }

    #[test]
    fn leading_config_flags_are_split_from_the_command() {
        let args = os_args(&[
            "spindle",
            "--config-path",
            "/etc/spindle.toml",
            "--sandbox-workers=2",
            "run",
            "notes.js",
            "--call",
            "add",
        ]);

        let split = split_config_arguments(&args);
        assert_eq!(
            split.config_arguments,
            os_args(&["spindle", "--config-path", "/etc/spindle.toml", "--sandbox-workers=2"])
        );
        assert_eq!(
            command_arguments(&args, &split),
            os_args(&["spindle", "run", "notes.js", "--call", "add"])
        );
    }

    #[test]
    fn config_flags_after_the_subcommand_stay_with_it() {
        let args = os_args(&["spindle", "docs", "a.js", "--log-filter", "debug"]);
        let split = split_config_arguments(&args);
        assert_eq!(split.config_arguments, os_args(&["spindle"]));
        assert_eq!(command_arguments(&args, &split), args);
    }

    #[test]
    fn empty_arguments_split_to_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(command_arguments(&[], &split).is_empty());
    }
}
