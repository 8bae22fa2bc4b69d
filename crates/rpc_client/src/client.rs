use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use subproc::{ExitReason, Message, Subprocess, SubprocessHandle};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RpcError;
use crate::pending::PendingTable;

/// Caller-side RPC client layered on top of a [`Subprocess`]'s message
/// framework. Registers itself as the handler for `response`/`error`
/// message types, so inbound replies are routed back to whichever
/// [`RpcClient::invoke`] call is waiting on their correlation id instead of
/// going through ordinary request dispatch. Retains the `JoinHandle` from
/// the `Subprocess::spawn` call it was attached to, so [`RpcClient::run`]
/// can drive that same reader loop to completion.
pub struct RpcClient {
    client_id: String,
    seq: AtomicU64,
    pending: Arc<PendingTable>,
    handle: SubprocessHandle,
    run_task: Mutex<Option<JoinHandle<ExitReason>>>,
    default_timeout: Duration,
    delivery_handoff_timeout: Duration,
}

impl RpcClient {
    /// Registers the response/error routing handlers on `subprocess` and
    /// retains the `(handle, run_task)` pair returned by a prior
    /// [`Subprocess::spawn`] call, so this client can later drive that loop
    /// via [`RpcClient::run`]. Registration must happen before
    /// [`Subprocess::spawn`]/[`Subprocess::run`] is called, since handler
    /// registration isn't safe to race against dispatch — pass in the
    /// `subprocess` reference used for that earlier registration step, not
    /// one spawned fresh here.
    pub fn attach(
        subprocess: &Subprocess,
        client_id: impl Into<String>,
        handle: SubprocessHandle,
        run_task: JoinHandle<ExitReason>,
        default_timeout: Duration,
        delivery_handoff_timeout: Duration,
    ) -> Self {
        let pending = Arc::new(PendingTable::new());

        let pending_for_responses = pending.clone();
        subprocess.register("response", move |_cancel: CancellationToken, msg: Message| {
            let pending = pending_for_responses.clone();
            let handoff = delivery_handoff_timeout;
            async move {
                pending.deliver(msg, handoff).await;
                Ok(None)
            }
        });
        let pending_for_errors = pending.clone();
        subprocess.register("error", move |_cancel: CancellationToken, msg: Message| {
            let pending = pending_for_errors.clone();
            let handoff = delivery_handoff_timeout;
            async move {
                pending.deliver(msg, handoff).await;
                Ok(None)
            }
        });

        Self {
            client_id: client_id.into(),
            seq: AtomicU64::new(0),
            pending,
            handle,
            run_task: Mutex::new(Some(run_task)),
            default_timeout,
            delivery_handoff_timeout,
        }
    }

    /// Drives the `Subprocess` reader loop this client was attached to,
    /// until the transport closes or a termination signal arrives. Typically
    /// awaited concurrently with any in-flight [`RpcClient::invoke`] calls.
    pub async fn run(&self) -> ExitReason {
        let task = self
            .run_task
            .lock()
            .expect("rpc client run task mutex poisoned")
            .take()
            .expect("RpcClient::run called more than once");
        task.await.expect("subprocess read loop task panicked")
    }

    /// Marshals `payload` (omitted entirely if `None`), sends a request
    /// built from `method`/`target`, and waits for the matching response,
    /// error, timeout, or cancellation — whichever comes first. A marshal
    /// failure returns [`RpcError::Marshal`] without allocating a
    /// correlation id or inserting a pending entry. A remote error response
    /// surfaces as [`RpcError::Remote`].
    pub async fn invoke<P: Serialize>(
        &self,
        method: impl Into<String>,
        payload: Option<P>,
        target: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Message, RpcError> {
        self.invoke_with_timeout(method, payload, target, self.default_timeout, cancel)
            .await
    }

    pub async fn invoke_with_timeout<P: Serialize>(
        &self,
        method: impl Into<String>,
        payload: Option<P>,
        target: impl Into<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, RpcError> {
        let payload = payload.map(serde_json::to_value).transpose()?;

        let correlation_id = self.next_correlation_id();
        let rx = self.pending.register(correlation_id.clone());

        let mut request = Message::request(method)
            .with_source(self.client_id.clone())
            .with_target(target)
            .with_correlation_id(correlation_id.clone());
        if let Some(payload) = payload {
            request = request.with_payload(payload);
        }

        if let Err(err) = self.handle.send(&request).await {
            self.pending.abandon(&correlation_id);
            return Err(RpcError::Send(err));
        }
        debug!(%correlation_id, method = %request.id, "rpc request sent");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.abandon(&correlation_id);
                Err(RpcError::Cancelled)
            }
            _ = sleep(timeout) => {
                self.pending.abandon(&correlation_id);
                Err(RpcError::Timeout(timeout))
            }
            result = rx => match result {
                Ok(msg) if msg.error.is_some() => {
                    Err(RpcError::Remote(msg.error.unwrap_or_default()))
                }
                Ok(msg) => Ok(msg),
                Err(_) => Err(RpcError::ChannelClosed),
            },
        }
    }

    /// Delivery handoff window handed to every registered response/error
    /// handler, surfaced for callers that want to reason about worst-case
    /// drop latency.
    pub fn delivery_handoff_timeout(&self) -> Duration {
        self.delivery_handoff_timeout
    }

    fn next_correlation_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-rpc-{seq}", self.client_id)
    }
}
