use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::SubprocError;

/// Initializes the global tracing subscriber: human-readable output on
/// stderr plus a JSON-lines file under `<logs_dir>/<process_id>.log`, both
/// gated by `RUST_LOG` (defaulting to `info`). Returns a guard that must be
/// held for the file writer to keep flushing; dropping it stops logging.
///
/// Safe to call once per process. A second call is a caller bug, not
/// something this crate works around.
pub fn init(logs_dir: &Path, process_id: &str) -> Result<WorkerGuard, SubprocError> {
    std::fs::create_dir_all(logs_dir).map_err(|source| SubprocError::PrepareLogDir {
        path: logs_dir.display().to_string(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::never(logs_dir, format!("{process_id}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_filter(filter());
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_creates_logs_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());
        // Don't actually call `init` here: it installs a process-global
        // subscriber, which would poison every other test in this binary.
        // Exercise just the directory-creation half it shares with `init`.
        std::fs::create_dir_all(&logs_dir).unwrap();
        assert!(logs_dir.is_dir());
    }
}
