use std::path::Path;

use dotenv::dotenv;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn env_filter(default_directive: &str) -> EnvFilter {
    // .env may carry RUST_LOG
    dotenv().ok();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Console only logging, filtered by `RUST_LOG` or else `default_directive`.
pub fn setup_local_tracing(default_directive: &str) -> AppResult<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(default_directive))
        .try_init()
        .map_err(|e| AppError::IllegalStateError(format!("tracing already set up: {}", e)))
}

/// Logs to stdout and to an hourly rotated file `<dir>/<prefix>.<hour>`.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the life of the process.
pub fn setup_tracing<P: AsRef<Path>>(
    dir: P,
    prefix: &str,
    default_directive: &str,
) -> AppResult<WorkerGuard> {
    let file_appender = tracing_appender::rolling::hourly(dir, prefix);
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stdout);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(default_directive))
        .try_init()
        .map_err(|e| AppError::IllegalStateError(format!("tracing already set up: {}", e)))?;
    Ok(worker_guard)
}
