use std::io;

use thiserror::Error;

/// Errors surfaced by the wire layer and the worker runtime.
///
/// Parse/no-handler/handler errors are reported on the wire by the
/// dispatcher itself and never reach a caller as a `SubprocError` — these
/// variants cover the synchronous, propagated half of the taxonomy:
/// transport setup, send failures, and the terminal transport-fatal case.
#[derive(Debug, Error)]
pub enum SubprocError {
    #[error("failed to connect to uds socket `{path}` after {attempts} attempts: {source}")]
    UdsConnect {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("inherited file descriptor {fd} is not a valid stream: {source}")]
    InvalidInheritedFd {
        fd: i32,
        #[source]
        source: io::Error,
    },
    #[error("outbound channel closed; writer task has exited")]
    ChannelClosed,
    #[error("failed to write frame to transport: {0}")]
    Write(#[source] io::Error),
    #[error("transport reached end of stream")]
    TransportEof,
    #[error("transport failed: {0}")]
    TransportFatal(#[source] io::Error),
    #[error("message exceeds maximum size of {max} bytes (observed {observed})")]
    MessageTooLarge { observed: usize, max: usize },
    #[error("failed to create log directory `{path}`: {source}")]
    PrepareLogDir {
        path: String,
        #[source]
        source: io::Error,
    },
}
