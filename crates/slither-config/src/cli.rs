//! Command-line argument parsing for the slither client.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::Config;
use crate::config::TransportKind;

/// Transport selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Blocking,
    Evented,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Blocking => TransportKind::Blocking,
            TransportArg::Evented => TransportKind::Evented,
        }
    }
}

/// Slither client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "slither", about = "Headless slither game client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Player name sent on login.
    #[arg(long)]
    pub username: Option<String>,

    /// Socket strategy.
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,

    /// Reconnect automatically after losing the connection.
    #[arg(long)]
    pub reconnect: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(transport) = args.transport {
            self.network.transport = transport.into();
        }
        if let Some(reconnect) = args.reconnect {
            self.network.auto_reconnect = reconnect;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }

    /// Username to log in with: the CLI value, else the remembered one.
    /// Blank names count as missing.
    pub fn resolve_username(&self, args: &CliArgs) -> Option<String> {
        args.username
            .as_deref()
            .or(self.profile.last_username.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}
