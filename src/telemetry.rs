//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level is the filter.
//! Logs go to stderr (compact or JSON) and, when a log file is configured,
//! also to that file through a non-blocking writer.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::Doc2MdError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install the global subscriber.
///
/// Hold the returned guard for the life of the process; dropping it stops
/// the file writer.
pub fn init(logging: &LoggingConfig) -> Result<Option<WorkerGuard>, Doc2MdError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| {
            Doc2MdError::InvalidConfig(format!("invalid log level '{}': {e}", logging.level))
        })?;

    let stderr_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                Doc2MdError::InvalidConfig(format!("log file '{}' has no file name", path.display()))
            })?;
            std::fs::create_dir_all(dir).map_err(|e| {
                Doc2MdError::InvalidConfig(format!(
                    "cannot create log directory '{}': {e}",
                    dir.display()
                ))
            })?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Doc2MdError::Internal(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}
