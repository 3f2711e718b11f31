//! Configuration for the slither client.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line via clap. Unknown fields are ignored and missing ones fall
//! back to defaults, so old and new config files both load.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, TransportArg};
pub use config::{
    Config, DebugConfig, EffectsConfig, NetworkConfig, ProfileConfig, SessionConfig,
    TransportKind, default_config_dir,
};
pub use error::ConfigError;
