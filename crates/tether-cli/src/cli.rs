//! CLI argument definitions for tether.
//!
//! Configuration flags (`--state-dir`, `--log-filter`, ...) are split off
//! before clap sees the arguments, so only command tokens are declared here.

use clap::{Args, Parser, Subcommand};
use tether_config::{DEFAULT_HOST, DEFAULT_PORT};
use tether_server::Engine;

use crate::lifecycle::{Mode, PortQuery, RestartOptions, StartOptions};

/// Manages a local HTTP server running in the background.
#[derive(Parser, Debug)]
#[command(name = "tether", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Starts the server in the background and waits until it is healthy.
    Start(StartArgs),
    /// Stops the tracked server.
    Stop,
    /// Reports whether the tracked server is running.
    Status,
    /// Stops the tracked server, then starts it again.
    Restart(RestartArgs),
    /// Reports whether a port is free.
    CheckPort(PortArgs),
    /// Runs the HTTP payload in the current process.
    #[command(hide = true)]
    Serve(ServeArgs),
}

/// Arguments accepted by `start`.
#[derive(Args, Debug, Clone)]
pub(crate) struct StartArgs {
    /// Address to bind.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub(crate) host: String,
    /// Port to bind.
    #[arg(long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) port: u16,
    /// Use the production engines instead of the development engine.
    #[arg(long)]
    pub(crate) production: bool,
    /// Replace a running tracked server and launch even if the port looks busy.
    #[arg(long)]
    pub(crate) force: bool,
    /// Keep the server attached to this terminal.
    #[arg(long)]
    pub(crate) foreground: bool,
}

impl From<StartArgs> for StartOptions {
    fn from(args: StartArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            mode: if args.production {
                Mode::Production
            } else {
                Mode::Development
            },
            force: args.force,
            foreground: args.foreground,
        }
    }
}

/// Arguments accepted by `restart`; omitted values come from the previous run.
#[derive(Args, Debug, Clone)]
pub(crate) struct RestartArgs {
    /// Address to bind.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Port to bind.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) port: Option<u16>,
    /// Use the production engines.
    #[arg(long)]
    pub(crate) production: bool,
    /// Launch even if an unmanaged process holds the port.
    #[arg(long)]
    pub(crate) force: bool,
}

impl From<RestartArgs> for RestartOptions {
    fn from(args: RestartArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            production: args.production,
            force: args.force,
        }
    }
}

/// Arguments accepted by `check-port`.
#[derive(Args, Debug, Clone)]
pub(crate) struct PortArgs {
    /// Address to probe.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub(crate) host: String,
    /// Port to probe.
    #[arg(long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) port: u16,
}

impl From<PortArgs> for PortQuery {
    fn from(args: PortArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
        }
    }
}

/// Arguments of the hidden payload entrypoint.
#[derive(Args, Debug, Clone)]
pub(crate) struct ServeArgs {
    /// Engine to serve with.
    #[arg(long)]
    pub(crate) engine: Engine,
    /// Address to bind.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub(crate) host: String,
    /// Port to bind.
    #[arg(long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) port: u16,
}
