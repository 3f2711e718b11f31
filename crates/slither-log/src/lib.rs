//! Structured logging for the slither client.
//!
//! Console output with uptime timestamps and thread names (the blocking
//! transport names its reader thread), plus a JSON log file in debug builds.
//! The level comes from `RUST_LOG` when set, otherwise from the config's
//! `debug.log_level`.

use std::fs::File;
use std::path::Path;

use slither_config::Config;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::Uptime;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config says otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE: &str = "slither.log";

/// Layer writing one JSON object per event to a file.
pub type JsonFileLayer<S> = fmt::Layer<S, JsonFields, Format<Json, Uptime>, File>;

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file (debug builds only)
/// * `debug_build` - whether to enable the file log
/// * `config` - source of the default log level
///
/// ```no_run
/// use slither_log::init_logging;
///
/// init_logging(Some(std::path::Path::new("./logs")), true, None);
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(config)))
        .unwrap_or_else(|_| default_env_filter());

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && let Ok(file_layer) = json_file_layer(log_dir)
    {
        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Filter directives derived from the config's log level.
pub fn filter_directives(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Create `log_dir` and a JSON file layer writing to [`LOG_FILE`] in it.
pub fn json_file_layer<S>(log_dir: &Path) -> std::io::Result<JsonFileLayer<S>> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = File::create(log_dir.join(LOG_FILE))?;
    Ok(fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json())
}

/// Create an `EnvFilter` with the default filter string. Used when the
/// configured level does not parse.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
