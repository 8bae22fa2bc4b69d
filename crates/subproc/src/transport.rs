use std::os::unix::io::{FromRawFd, RawFd};
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::SubprocError;

/// How a worker connects to the broker, chosen at build time.
/// The message loop never inspects which variant produced its streams.
#[derive(Clone, Debug)]
pub enum TransportConfig {
    /// Adopt two already-open file descriptors the broker handed us
    /// (conventionally 3 for input, 4 for output).
    FdPair { input_fd: RawFd, output_fd: RawFd },
    /// Connect to `<base>_<process_id>.sock`, retrying with backoff. If the
    /// retries are exhausted and `fallback` is `Some`, fall back to that FD
    /// pair; if `fallback` is `None`, fail fatally.
    Uds {
        base_path: String,
        process_id: String,
        fallback: Option<(RawFd, RawFd)>,
    },
}

impl TransportConfig {
    pub fn uds_path(base_path: &str, process_id: &str) -> PathBuf {
        PathBuf::from(format!("{base_path}_{process_id}.sock"))
    }
}

pub type ReadHalf = Box<dyn AsyncRead + Unpin + Send>;
pub type WriteHalf = Box<dyn AsyncWrite + Unpin + Send>;

/// Opens the transport streams described by `config`. Either variant yields
/// identical byte-stream semantics to the caller.
pub async fn open(
    config: &TransportConfig,
    runtime: &RuntimeConfig,
) -> Result<(ReadHalf, WriteHalf), SubprocError> {
    match config {
        TransportConfig::FdPair {
            input_fd,
            output_fd,
        } => open_fd_pair(*input_fd, *output_fd),
        TransportConfig::Uds {
            base_path,
            process_id,
            fallback,
        } => open_uds(base_path, process_id, *fallback, runtime).await,
    }
}

fn open_fd_pair(input_fd: RawFd, output_fd: RawFd) -> Result<(ReadHalf, WriteHalf), SubprocError> {
    // SAFETY: the broker guarantees these fds are open, valid, and owned by
    // this process for the lifetime of the worker; we take ownership here.
    let input = unsafe { std::fs::File::from_raw_fd(input_fd) };
    let output = unsafe { std::fs::File::from_raw_fd(output_fd) };
    input.metadata().map_err(|source| SubprocError::InvalidInheritedFd {
        fd: input_fd,
        source,
    })?;
    let input = tokio::fs::File::from_std(input);
    let output = tokio::fs::File::from_std(output);
    debug!(input_fd, output_fd, "adopted inherited fd pair transport");
    Ok((Box::new(input), Box::new(output)))
}

async fn open_uds(
    base_path: &str,
    process_id: &str,
    fallback: Option<(RawFd, RawFd)>,
    runtime: &RuntimeConfig,
) -> Result<(ReadHalf, WriteHalf), SubprocError> {
    let path = TransportConfig::uds_path(base_path, process_id);
    let path_display = path.display().to_string();

    let mut backoff = runtime.uds_connect_backoff_start;
    let mut last_err = None;
    for attempt in 1..=runtime.uds_connect_retries {
        match UnixStream::connect(&path).await {
            Ok(stream) => {
                debug!(path = %path_display, attempt, "connected to uds transport");
                let (read_half, write_half) = stream.into_split();
                return Ok((Box::new(read_half), Box::new(write_half)));
            }
            Err(err) => {
                last_err = Some(err);
                if attempt < runtime.uds_connect_retries {
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, runtime.uds_connect_backoff_cap);
                }
            }
        }
    }

    let source = last_err.expect("loop runs at least once");
    match fallback {
        Some((input_fd, output_fd)) => {
            warn!(
                path = %path_display,
                attempts = runtime.uds_connect_retries,
                "uds connect exhausted retries, falling back to inherited fd pair"
            );
            open_fd_pair(input_fd, output_fd)
        }
        None => Err(SubprocError::UdsConnect {
            path: path_display,
            attempts: runtime.uds_connect_retries,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uds_path_joins_base_and_process_id() {
        let path = TransportConfig::uds_path("/tmp/v2e_uds", "cve-worker-1");
        assert_eq!(path, PathBuf::from("/tmp/v2e_uds_cve-worker-1.sock"));
    }

    #[tokio::test]
    async fn uds_connect_without_fallback_is_fatal_after_retries() {
        let runtime = RuntimeConfig::fast_for_tests();
        let config = TransportConfig::Uds {
            base_path: "/tmp/v2e_uds_test_nonexistent".into(),
            process_id: "no-such-worker".into(),
            fallback: None,
        };
        let err = match open(&config, &runtime).await {
            Ok(_) => panic!("expected uds connect to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, SubprocError::UdsConnect { .. }));
    }
}
