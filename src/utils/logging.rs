use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LoggingConfig, PathsConfig};

/// Installs the global subscriber: stdout plus a daily-rolling file in
/// `paths.log_dir`. `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(logging: &LoggingConfig, paths: &PathsConfig) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&paths.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, &logging.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?
        .add_directive("html5ever=warn".parse()?)
        .add_directive("selectors=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}
