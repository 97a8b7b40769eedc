//! Entry point for the `spindle` binary.
//!
//! All work happens in [`spindle_cli::run`]; the binary only supplies the
//! process arguments and locked standard streams.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    spindle_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
