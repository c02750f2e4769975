//! Command-line runtime for tether.
//!
//! The runtime splits leading configuration flags from the command, loads the
//! layered [`tether_config::Config`], initialises telemetry, and dispatches to
//! either the lifecycle controller or the hidden `serve` payload. IO streams
//! and the configuration loader are injectable so tests can drive the whole
//! runtime without touching the process environment.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tether_config::Config;
use tether_server::ServeOptions;
use tether_server::telemetry::{self, Role};

mod cli;
mod config;
mod errors;
mod lifecycle;

use cli::{Cli, CliCommand};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use lifecycle::{
    LifecycleContext, LifecycleError, LifecycleInvocation, LifecycleOutput, SystemLifecycle,
};

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `tether_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--state-dir",
    "--log-filter",
    "--log-format",
    "--readiness-timeout-ms",
    "--grace-period-ms",
];

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

/// What a parsed command line asks for.
enum Dispatch {
    Lifecycle(LifecycleInvocation),
    Serve(ServeOptions),
}

impl Dispatch {
    const fn role(&self) -> Role {
        match self {
            Self::Lifecycle(_) => Role::Manager,
            Self::Serve(_) => Role::Server,
        }
    }
}

impl From<CliCommand> for Dispatch {
    fn from(command: CliCommand) -> Self {
        match command {
            CliCommand::Start(args) => Self::Lifecycle(LifecycleInvocation::Start(args.into())),
            CliCommand::Stop => Self::Lifecycle(LifecycleInvocation::Stop),
            CliCommand::Status => Self::Lifecycle(LifecycleInvocation::Status),
            CliCommand::Restart(args) => {
                Self::Lifecycle(LifecycleInvocation::Restart(args.into()))
            }
            CliCommand::CheckPort(args) => {
                Self::Lifecycle(LifecycleInvocation::CheckPort(args.into()))
            }
            CliCommand::Serve(args) => Self::Serve(ServeOptions {
                host: args.host,
                port: args.port,
                engine: args.engine,
            }),
        }
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    server_binary: Option<&'a OsStr>,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    const fn new(io: &'a mut IoStreams<'a, W, E>, loader: &'a L) -> Self {
        Self {
            io,
            loader,
            server_binary: None,
        }
    }

    #[cfg(test)]
    fn with_server_binary(mut self, server_binary: Option<&'a OsStr>) -> Self {
        self.server_binary = server_binary;
        self
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut lifecycle = SystemLifecycle;
        self.run_with_handler(args, |invocation, context, output| {
            lifecycle.handle(invocation, context, output)
        })
    }

    fn run_with_handler<I, F>(&mut self, args: I, mut handler: F) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
        F: FnMut(
            LifecycleInvocation,
            LifecycleContext<'_>,
            &mut LifecycleOutput<&mut W, &mut E>,
        ) -> Result<ExitCode, LifecycleError>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);
        let cli_arguments = prepare_cli_arguments(&args, &split);

        let cli = match Cli::try_parse_from(cli_arguments) {
            Ok(cli) => cli,
            // Help and version requests are successful output, not usage errors.
            Err(error) if !error.use_stderr() => {
                let _ = write!(self.io.stdout, "{error}");
                return ExitCode::SUCCESS;
            }
            Err(error) => return self.fail(&AppError::CliUsage(error)),
        };

        let dispatch = Dispatch::from(cli.command);
        let role = dispatch.role();
        let result = self
            .loader
            .load(&split.config_arguments)
            .and_then(|config| {
                telemetry::initialise(&config, role)?;
                Ok(config)
            })
            .and_then(|config| {
                self.dispatch(dispatch, &config, &split.config_arguments, &mut handler)
            });

        match result {
            Ok(exit_code) => exit_code,
            Err(error) => self.fail(&error),
        }
    }

    fn dispatch<F>(
        &mut self,
        dispatch: Dispatch,
        config: &Config,
        config_arguments: &[OsString],
        handler: &mut F,
    ) -> Result<ExitCode, AppError>
    where
        F: FnMut(
            LifecycleInvocation,
            LifecycleContext<'_>,
            &mut LifecycleOutput<&mut W, &mut E>,
        ) -> Result<ExitCode, LifecycleError>,
    {
        match dispatch {
            Dispatch::Serve(options) => {
                tether_server::run(&options)?;
                Ok(ExitCode::SUCCESS)
            }
            Dispatch::Lifecycle(invocation) => {
                let context = LifecycleContext {
                    config,
                    config_arguments,
                    server_binary: self.server_binary,
                };
                let mut output = LifecycleOutput::new(&mut *self.io.stdout, &mut *self.io.stderr);
                handler(invocation, context, &mut output).map_err(AppError::from)
            }
        }
    }

    fn fail(&mut self, error: &AppError) -> ExitCode {
        let _ = writeln!(self.io.stderr, "{error}");
        error.exit_code()
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    let mut cli_arguments: Vec<OsString> = Vec::new();
    if let Some(first) = args.first() {
        cli_arguments.push(first.clone());
    }
    cli_arguments.extend(args.iter().skip(split.command_start).cloned());
    cli_arguments
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<'a, I, W, E, L>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader).run(args)
}

/// Runs the CLI with an injected lifecycle handler.
#[cfg(test)]
pub(crate) fn run_with_handler<'a, I, W, E, L, F>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    server_binary: Option<&'a OsStr>,
    handler: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
    F: FnMut(
        LifecycleInvocation,
        LifecycleContext<'_>,
        &mut LifecycleOutput<&mut W, &mut E>,
    ) -> Result<ExitCode, LifecycleError>,
{
    CliRunner::new(io, loader)
        .with_server_binary(server_binary)
        .run_with_handler(args, handler)
}

#[cfg(test)]
mod tests;
