use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    prelude::*,
};

pub mod actix_collection_api;
pub mod actor;
pub mod in_memory_snapshot_storage;
pub mod request;
pub mod sled_storage;
pub mod snapshot_storage;

/// Installs the global subscriber: `RUST_LOG`-aware stdout logging, plus a
/// daily rolling file under `log_dir` when given. Keep the returned guard
/// alive for as long as file logs should be flushed.
pub fn init_tracing(log_dir: Option<&Path>, file_prefix: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false);
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_ansi(false).with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .try_init();
            None
        }
    }
}
