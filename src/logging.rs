use crate::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Terminal sessions can run for hours between payments; anything other
/// than `hourly` or `daily` writes one file.
fn rotation(name: &str) -> Rotation {
    match name {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Route monitor events to the configured file, and to the console unless
/// JSON output is requested. `RUST_LOG` overrides `log_level`.
///
/// The returned guard flushes the file writer on drop, so hold it until the
/// process exits.
pub fn init_logging(config: &LogConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let level = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::registry().with(level);

    if config.use_json {
        subscriber
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .with(fmt::layer().compact().with_ansi(true))
            .init();
    }

    guard
}
