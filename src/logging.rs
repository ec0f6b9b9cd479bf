//! Tracing setup shared by the server and relay binaries.
//!
//! Both processes read the same config file, so each passes its own service
//! name and gets its own rolling log file; a shared file name would make the
//! two appenders clobber each other.

use crate::config::{LogConfig, Rotation};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

pub fn init_logging(service: &str, config: &LogConfig) -> WorkerGuard {
    let file_name = format!("{}.log", service);
    let file_appender = match config.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&config.dir, &file_name),
        Rotation::Daily => tracing_appender::rolling::daily(&config.dir, &file_name),
        Rotation::Never => tracing_appender::rolling::never(&config.dir, &file_name),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // sqlx statement logging and librdkafka chatter drown the request logs
    // below warn. RUST_LOG still overrides everything.
    let default_filter = format!(
        "{},sqlx=warn,librdkafka=warn,rdkafka=warn",
        config.level
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = if config.use_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    };
    let stdout_layer = fmt::layer().with_target(false).with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}
