use std::sync::Mutex;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::RuntimeConfig;
use crate::transport::WriteHalf;

/// A pool of reusable byte buffers, drawn for each flush and returned
/// afterward so hot-path flushes don't allocate. Every draw is paired with a
/// release via [`PooledBuf`]'s `Drop`, so a panicking flush can't leak one.
pub(crate) struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(&self, capacity_hint: usize) -> BytesMut {
        let mut guard = self.buffers.lock().expect("buffer pool poisoned");
        guard
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(capacity_hint))
    }

    pub(crate) fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut guard = self.buffers.lock().expect("buffer pool poisoned");
        guard.push(buf);
    }
}

/// Handle producers use to hand a pre-marshaled frame (no trailing newline)
/// to the writer task. Cloning shares the same bounded channel.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Vec<u8>>,
}

impl WriterHandle {
    /// Sends `frame` to the writer task. Suspends if the outbound channel is
    /// full; fails if the writer task has exited.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), crate::error::SubprocError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| crate::error::SubprocError::ChannelClosed)
    }
}

/// Spawns the single writer task that owns `output` and serializes all
/// writes to it. Returns a [`WriterHandle`] for producers and the task's
/// `JoinHandle` so the owner can await its completion at shutdown.
pub(crate) fn spawn(
    mut output: WriteHalf,
    runtime: RuntimeConfig,
    cancel: CancellationToken,
    batching_enabled: bool,
) -> (WriterHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(runtime.outbound_channel_capacity);
    let pool = BufferPool::new();

    let task = tokio::spawn(async move {
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(runtime.batch_size_threshold);
        let mut ticker = interval(runtime.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if batching_enabled {
                                batch.push(frame);
                                if batch.len() >= runtime.batch_size_threshold {
                                    flush(&mut output, &mut batch, &pool, &runtime).await;
                                }
                            } else if frame.len() >= runtime.zero_copy_threshold_bytes {
                                direct_write(&mut output, &frame).await;
                            } else {
                                batch.push(frame);
                                flush(&mut output, &mut batch, &pool, &runtime).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        flush(&mut output, &mut batch, &pool, &runtime).await;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Drain whatever the channel is still holding, non-blocking, then
        // perform one final flush.
        while let Ok(frame) = rx.try_recv() {
            batch.push(frame);
        }
        if !batch.is_empty() {
            flush(&mut output, &mut batch, &pool, &runtime).await;
        }
        let _ = output.shutdown().await;
    });

    (WriterHandle { tx }, task)
}

async fn direct_write(output: &mut WriteHalf, frame: &[u8]) {
    if let Err(err) = output.write_all(frame).await {
        warn!(%err, "direct write failed");
        return;
    }
    if let Err(err) = output.write_all(b"\n").await {
        warn!(%err, "direct write newline failed");
    }
}

/// Flushes `batch` to `output`, resetting `batch`'s length but retaining its
/// capacity. Streams frames one-by-one once the summed size crosses
/// `streaming_flush_threshold_bytes`, otherwise joins them into one pooled
/// buffer and performs a single write.
async fn flush(
    output: &mut WriteHalf,
    batch: &mut Vec<Vec<u8>>,
    pool: &BufferPool,
    runtime: &RuntimeConfig,
) {
    if batch.is_empty() {
        return;
    }
    let total: usize = batch.iter().map(|f| f.len() + 1).sum();
    trace!(frames = batch.len(), total_bytes = total, "flushing batch");

    if total >= runtime.streaming_flush_threshold_bytes {
        for frame in batch.drain(..) {
            if output.write_all(&frame).await.is_err() {
                break;
            }
            if output.write_all(b"\n").await.is_err() {
                break;
            }
        }
    } else {
        let mut joined = pool.acquire(total.max(runtime.writer_buffer_bytes));
        for frame in batch.drain(..) {
            joined.extend_from_slice(&frame);
            joined.extend_from_slice(b"\n");
        }
        let _ = output.write_all(&joined).await;
        pool.release(joined);
    }
    let _ = output.flush().await;
}
