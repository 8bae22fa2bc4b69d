use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::message::Message;
use crate::reply::error_response;
use crate::registry::HandlerRegistry;
use crate::writer::WriterHandle;

/// Resolves a handler for `msg`, invokes it, and writes whatever reply (if
/// any) results — constructing a no-handler or handler-error reply per spec
/// §4.2 when needed. Runs on its own task per inbound message so a slow
/// handler never blocks the reader loop.
pub(crate) async fn handle_one(
    msg: Message,
    registry: HandlerRegistry,
    writer: WriterHandle,
    self_id: String,
    cancel: CancellationToken,
) {
    let Some(handler) = registry.resolve(&msg) else {
        let reply = error_response(
            &msg,
            format!("no handler found for message: {}", msg.id),
        );
        send(&writer, reply).await;
        return;
    };

    match handler.call(cancel, msg.clone()).await {
        Ok(Some(mut reply)) => {
            if reply.correlation_id.is_none() {
                reply.correlation_id = msg.correlation_id.clone();
            }
            if reply.target.is_none() {
                reply.target = msg.source.clone();
            }
            reply.source.get_or_insert(self_id);
            send(&writer, reply).await;
        }
        Ok(None) => {}
        Err(err) => {
            send(&writer, error_response(&msg, err.to_string())).await;
        }
    }
}

/// Synthesizes and sends an error reply for a line that failed to parse;
/// the reader continues with the next line regardless.
pub(crate) async fn handle_parse_error(detail: impl std::fmt::Display, self_id: &str, writer: &WriterHandle) {
    let msg = Message {
        kind: crate::message::MessageType::Error,
        id: "parse-error".into(),
        payload: None,
        error: Some(format!("failed to parse message: {detail}")),
        source: Some(self_id.to_string()),
        target: None,
        correlation_id: None,
    };
    send(writer, msg).await;
}

async fn send(writer: &WriterHandle, msg: Message) {
    match msg.to_line() {
        Ok(line) => {
            // The writer appends its own trailing newline; strip the one
            // `to_line` adds so the wire never double-terminates a frame.
            let bytes = line.trim_end_matches('\n').as_bytes().to_vec();
            if let Err(err) = writer.send(bytes).await {
                warn!(%err, "failed to hand reply to writer");
            }
        }
        Err(err) => warn!(%err, "failed to marshal reply"),
    }
}

/// Allows tests to construct a [`Message`] and feed it straight to
/// [`success_response_value`]-shaped assertions without spinning up a full
/// `Subprocess`.
#[cfg(test)]
pub(crate) fn reply_payload(msg: &Message, payload: serde_json::Value) -> Message {
    crate::reply::success_response_value(msg, payload)
}
