//! Command-line runtime for the `spindle` extension host.
//!
//! [`run`] splits leading configuration flags from the subcommand, parses
//! the subcommand, layers configuration, installs telemetry and dispatches.
//! Output streams are injected so the runtime can be driven from tests with
//! in-memory buffers.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use spindle_config::Config;

mod cli;
mod commands;
mod config;
mod errors;
mod telemetry;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
use commands::Streams;
use config::{ConfigLoader, OrthoConfigLoader, command_arguments, split_config_arguments};
use errors::AppError;

/// Runs the CLI with the given arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let mut streams = Streams { stdout, stderr };
    let all_arguments: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&all_arguments);
    let cli = match Cli::try_parse_from(command_arguments(&all_arguments, &split)) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            return match write!(streams.stdout, "{error}") {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(&AppError::CliUsage(error), streams.stderr),
    };

    let configure = || -> Result<Config, AppError> {
        let config = loader.load(&split.config_arguments)?;
        telemetry::initialise(&config)?;
        Ok(config)
    };
    match dispatch(cli, configure, &mut streams) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(&error, streams.stderr),
    }
}

fn report<E: Write>(error: &AppError, stderr: &mut E) -> ExitCode {
    // clap renders its own "error:" prefix and usage block.
    let written = if matches!(error, AppError::CliUsage(_)) {
        write!(stderr, "{error}")
    } else {
        writeln!(stderr, "error: {error}")
    };
    if written.is_err() {
        return ExitCode::FAILURE;
    }
    ExitCode::from(error.exit_code())
}

fn dispatch<W, E, C>(cli: Cli, configure: C, streams: &mut Streams<'_, W, E>) -> Result<(), AppError>
where
    W: Write,
    E: Write,
    C: FnOnce() -> Result<Config, AppError>,
{
    match cli.command {
        // Namespace resolution is pure; it needs neither configuration nor logs.
        CliCommand::Namespace { id } => commands::namespace(&id, streams),
        CliCommand::Docs { source, evaluate } => {
            let config = configure()?;
            commands::docs(&config, &source, evaluate, streams)
        }
        CliCommand::Run { source, call, args } => {
            let config = configure()?;
            commands::run(&config, &source, call.as_deref(), &args, streams)
        }
        CliCommand::Trigger {
            hook_type,
            context,
            files,
        } => {
            let config = configure()?;
            commands::trigger(&config, &hook_type, &context, &files, streams)
        }
    }
}
