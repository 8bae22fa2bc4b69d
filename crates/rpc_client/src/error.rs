use thiserror::Error;

/// Errors surfaced by [`crate::RpcClient::invoke`].
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to marshal rpc request: {0}")]
    Marshal(#[from] serde_json::Error),
    #[error("failed to send rpc request: {0}")]
    Send(#[from] subproc::SubprocError),
    #[error("rpc call timeout after {0:?} elapsed")]
    Timeout(std::time::Duration),
    #[error("rpc call was cancelled before a response arrived")]
    Cancelled,
    #[error("rpc client's response channel was closed")]
    ChannelClosed,
    #[error("received an error response: {0}")]
    Remote(String),
}
