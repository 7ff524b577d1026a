//! Entry point for the `vessel` sandbox launcher.
//!
//! The binary delegates to [`vessel_cli::run`], which parses arguments,
//! loads configuration, plans the container layout and supervises the
//! launcher.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    vessel_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
