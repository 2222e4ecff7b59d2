use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::Configuration;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Install the global subscriber: stderr output filtered by RUST_LOG plus a
/// daily-rolling file under the data dir. Returns false if a subscriber was
/// already installed.
pub fn tracing_subscribe(config: &Configuration) -> bool {
    let env_filter_layer =
        fmt::layer().with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,quarry=debug")
        }));

    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "quarry.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(log_writer_layer)
        .with(env_filter_layer)
        .try_init()
        .is_ok()
}
