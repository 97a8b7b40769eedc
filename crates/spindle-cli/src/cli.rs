//! Command-line argument definitions for the `spindle` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Load, document and run sandboxed JavaScript extensions.
#[derive(Parser, Debug)]
#[command(
    name = "spindle",
    version,
    disable_help_subcommand = true,
    after_help = "Configuration flags go before the subcommand:\n  \
                  --config-path PATH, --log-filter FILTER, --log-format FORMAT,\n  \
                  --sandbox-timeout-ms MS, --sandbox-workers COUNT, --packages-root DIR\n\
                  Each also reads a SPINDLE_* environment variable, for example \
                  SPINDLE_SANDBOX_TIMEOUT_MS."
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// An extension given on the command line as a source file.
#[derive(Args, Debug, Clone)]
pub(crate) struct SourceArgs {
    /// JavaScript source of the extension.
    #[arg(value_name = "FILE")]
    pub(crate) file: PathBuf,
    /// Extension id; defaults to the file stem.
    #[arg(long)]
    pub(crate) id: Option<String>,
    /// Display name; defaults to the id.
    #[arg(long)]
    pub(crate) name: Option<String>,
    /// Backend package as `name@version`. Repeatable.
    #[arg(long = "dependency", value_name = "NAME@VERSION")]
    pub(crate) dependencies: Vec<String>,
    /// Keeps console output as debug logs and prints them to stderr.
    #[arg(long)]
    pub(crate) debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Prints the namespace an extension id resolves to.
    Namespace {
        /// Kebab-case extension id.
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Prints the context documentation for an extension.
    Docs {
        #[command(flatten)]
        source: SourceArgs,
        /// Evaluates the extension and restricts the function list to its
        /// actual exports.
        #[arg(long)]
        evaluate: bool,
    },
    /// Evaluates an extension and optionally calls one of its functions.
    Run {
        #[command(flatten)]
        source: SourceArgs,
        /// Function to call after loading.
        #[arg(long, value_name = "FUNCTION")]
        call: Option<String>,
        /// JSON argument passed to the call. Repeatable.
        #[arg(long = "arg", value_name = "JSON", requires = "call")]
        args: Vec<String>,
    },
    /// Loads extensions and fires a lifecycle hook at them.
    Trigger {
        /// Lifecycle event name, for example `afterFileUpload`.
        #[arg(value_name = "HOOK")]
        hook_type: String,
        /// JSON context handed to every handler.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        context: String,
        /// Extension source files; ids are taken from the file stems.
        #[arg(value_name = "FILE", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
}
