//! Structured logging for the Metaversitas client.
//!
//! Wires the `tracing` ecosystem: console output with uptime timestamps and
//! module paths, optional JSON file output in debug builds, and an
//! `EnvFilter` whose default comes from the config's `debug.log_level`.

use std::path::Path;

use metaversitas_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config specify one.
///
/// The session core logs every state trigger at `debug`, so it is held at
/// `info` unless asked for explicitly.
pub const DEFAULT_FILTER: &str = "info,metaversitas_net=info";

/// File name of the JSON log written in debug builds.
pub const LOG_FILE_NAME: &str = "metaversitas.log";

/// Build the filter string from the config, falling back to
/// [`DEFAULT_FILTER`].
pub fn filter_directive(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.trim().to_string()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the config. When `debug_build` is set and
/// `log_dir` can be created, a JSON copy of every event is written to
/// [`LOG_FILE_NAME`] inside it.
///
/// # Examples
///
/// ```no_run
/// use metaversitas_config::Config;
/// use metaversitas_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let directive = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

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
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}
