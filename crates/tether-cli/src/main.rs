//! CLI entrypoint for tether.
//!
//! The binary delegates to [`tether_cli::run`], which loads configuration,
//! parses the command line, and either manages the background server or, via
//! the hidden `serve` subcommand, becomes that server.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tether_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
