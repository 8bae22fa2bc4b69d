use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::dispatch;
use crate::error::SubprocError;
use crate::message::{Message, MAX_MESSAGE_BYTES};
use crate::registry::{Handler, HandlerRegistry};
use crate::transport::{self, ReadHalf, TransportConfig};
use crate::writer::{self, WriterHandle};

/// Why [`Subprocess::run`] returned, so a caller can pick a process exit
/// code without the runtime baking in `std::process::exit` itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitReason {
    /// The transport reached EOF; the peer closed its end normally.
    TransportClosed,
    /// A SIGINT/SIGTERM (or, on non-unix targets, Ctrl-C) was observed and
    /// the runtime drained in-flight handlers before returning.
    Signaled,
}

impl ExitReason {
    /// Conventional process exit code: `0` for both paths, since neither
    /// represents a failure the caller needs to report via exit status.
    /// A transport-fatal error instead surfaces as `Err(SubprocError)`.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitReason::TransportClosed | ExitReason::Signaled => 0,
        }
    }
}

/// A live, sendable handle to a running [`Subprocess`]'s outbound side.
/// Cloning shares the same underlying writer; the last clone to drop closes
/// the writer's channel, letting the read loop flush and exit.
#[derive(Clone)]
pub struct SubprocessHandle {
    writer: WriterHandle,
}

impl SubprocessHandle {
    /// Marshals and hands `msg` to the writer's batching/flush policy.
    pub async fn send(&self, msg: &Message) -> Result<(), SubprocError> {
        let line = msg.to_line().map_err(|_| SubprocError::ChannelClosed)?;
        self.writer
            .send(line.trim_end_matches('\n').as_bytes().to_vec())
            .await
    }
}

/// Ties together [`HandlerRegistry`], the transport, and the batching writer
/// into a single read-dispatch-write loop.
///
/// Construct with [`Subprocess::new`], register handlers, then call
/// [`Subprocess::run`] to drive the loop until the transport closes or a
/// termination signal arrives. Callers that also need to *send* messages
/// concurrently with the loop (the RPC client's request path) should use
/// [`Subprocess::spawn`] instead and hold onto the returned
/// [`SubprocessHandle`].
pub struct Subprocess {
    process_id: String,
    registry: HandlerRegistry,
    runtime: RuntimeConfig,
}

impl Subprocess {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            registry: HandlerRegistry::new(),
            runtime: RuntimeConfig::default(),
        }
    }

    pub fn with_runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Registers `handler` under `pattern`. See [`HandlerRegistry::register`]
    /// for the lookup rules a registered pattern participates in.
    pub fn register(&self, pattern: impl Into<String>, handler: impl Handler) -> &Self {
        self.registry.register(pattern, handler);
        self
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Opens `transport`, then drives the loop until the peer closes the
    /// stream or a termination signal arrives, whichever comes first.
    /// `batching_enabled` selects the writer's batching policy;
    /// pass `false` for workers that need every reply flushed immediately.
    pub async fn run(
        &self,
        transport_config: TransportConfig,
        batching_enabled: bool,
    ) -> Result<ExitReason, SubprocError> {
        let (handle, task) = self.spawn(transport_config, batching_enabled).await?;
        drop(handle);
        Ok(task.await.expect("subprocess read loop task panicked"))
    }

    /// Like [`Subprocess::run`], but returns immediately with a
    /// [`SubprocessHandle`] for sending messages and a `JoinHandle` the
    /// caller can await for the loop's [`ExitReason`]. Dropping every clone
    /// of the handle lets the writer drain and the loop continue toward its
    /// natural end (EOF or signal); it does not by itself stop the loop.
    pub async fn spawn(
        &self,
        transport_config: TransportConfig,
        batching_enabled: bool,
    ) -> Result<(SubprocessHandle, tokio::task::JoinHandle<ExitReason>), SubprocError> {
        let (input, output) = transport::open(&transport_config, &self.runtime).await?;
        let cancel = CancellationToken::new();
        let (writer_handle, writer_task) =
            writer::spawn(output, self.runtime.clone(), cancel.clone(), batching_enabled);

        let registry = self.registry.clone();
        let process_id = self.process_id.clone();
        let loop_writer = writer_handle.clone();
        let task = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let reason = read_loop(&registry, &process_id, input, &loop_writer, &cancel, &mut tasks).await;

            cancel.cancel();
            while tasks.join_next().await.is_some() {}
            drop(loop_writer);
            let _ = writer_task.await;
            reason
        });

        Ok((SubprocessHandle { writer: writer_handle }, task))
    }
}

async fn read_loop(
    registry: &HandlerRegistry,
    process_id: &str,
    input: ReadHalf,
    writer: &WriterHandle,
    cancel: &CancellationToken,
    tasks: &mut JoinSet<()>,
) -> ExitReason {
    let mut reader = BoundedLineReader::new(input, MAX_MESSAGE_BYTES);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExitReason::Signaled,
            _ = wait_for_termination_signal() => {
                info!("termination signal received, shutting down");
                return ExitReason::Signaled;
            }
            line = reader.read_line() => {
                match line {
                    Ok(Some(bytes)) => dispatch_line(bytes, registry, process_id, writer, cancel, tasks).await,
                    Ok(None) => return ExitReason::TransportClosed,
                    Err(SubprocError::MessageTooLarge { observed, max }) => {
                        warn!(observed, max, "dropping oversized frame");
                        dispatch::handle_parse_error(
                            format!("message of {observed} bytes exceeds {max} byte limit"),
                            process_id,
                            writer,
                        )
                        .await;
                    }
                    Err(err) => {
                        warn!(%err, "transport read failed, shutting down");
                        return ExitReason::TransportClosed;
                    }
                }
            }
        }
    }
}

async fn dispatch_line(
    bytes: Vec<u8>,
    registry: &HandlerRegistry,
    process_id: &str,
    writer: &WriterHandle,
    cancel: &CancellationToken,
    tasks: &mut JoinSet<()>,
) {
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => text,
        Err(err) => {
            dispatch::handle_parse_error(err, process_id, writer).await;
            return;
        }
    };
    match Message::from_line(text) {
        Ok(msg) => {
            debug!(id = %msg.id, kind = ?msg.kind, "dispatching message");
            tasks.spawn(dispatch::handle_one(
                msg,
                registry.clone(),
                writer.clone(),
                process_id.to_string(),
                cancel.clone(),
            ));
        }
        Err(err) => {
            dispatch::handle_parse_error(err, process_id, writer).await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Reads `\n`-delimited frames from `inner`, rejecting any line whose byte
/// length (before the newline is found) exceeds `max`. On a too-large line
/// it keeps reading until the next newline so the stream resynchronizes
/// instead of treating the rest of the connection as corrupt.
struct BoundedLineReader<R> {
    inner: R,
    buf: Vec<u8>,
    scan_from: usize,
    max: usize,
}

impl<R: tokio::io::AsyncRead + Unpin> BoundedLineReader<R> {
    fn new(inner: R, max: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scan_from: 0,
            max,
        }
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, SubprocError> {
        loop {
            if let Some(pos) = self.buf[self.scan_from..].iter().position(|&b| b == b'\n') {
                let newline_at = self.scan_from + pos;
                let line: Vec<u8> = self.buf.drain(..=newline_at).collect();
                self.scan_from = 0;
                let line_len = line.len() - 1;
                if line_len > self.max {
                    return Err(SubprocError::MessageTooLarge {
                        observed: line_len,
                        max: self.max,
                    });
                }
                return Ok(Some(line[..line_len].to_vec()));
            }
            self.scan_from = self.buf.len();

            if self.buf.len() > self.max {
                // No newline yet and already over budget: keep consuming
                // until one appears, then report the oversized line.
                let mut chunk = [0u8; 8192];
                let n = self
                    .inner
                    .read(&mut chunk)
                    .await
                    .map_err(SubprocError::TransportFatal)?;
                if n == 0 {
                    return Ok(None);
                }
                if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                    let observed = self.buf.len() + pos;
                    self.buf.clear();
                    self.scan_from = 0;
                    self.buf.extend_from_slice(&chunk[pos + 1..n]);
                    return Err(SubprocError::MessageTooLarge {
                        observed,
                        max: self.max,
                    });
                }
                self.buf.extend_from_slice(&chunk[..n]);
                continue;
            }

            let mut chunk = [0u8; 8192];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(SubprocError::TransportFatal)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // A trailing line with no newline is treated as incomplete
                // and discarded; the peer closed mid-frame.
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
