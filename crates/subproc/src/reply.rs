use serde::Serialize;
use serde_json::Value;

use crate::message::{Message, MessageType};

/// Builds a success response from an originating Message so handler authors
/// cannot forget to propagate `correlation_id` and `target`.
pub fn success_response(origin: &Message, result: &impl Serialize) -> serde_json::Result<Message> {
    Ok(route_from_origin(
        origin,
        MessageType::Response,
        Some(serde_json::to_value(result)?),
        None,
    ))
}

/// Builds a success response whose payload is already a [`Value`].
pub fn success_response_value(origin: &Message, payload: Value) -> Message {
    route_from_origin(origin, MessageType::Response, Some(payload), None)
}

/// Builds an error response from an originating Message, propagating the
/// same routing fields a success response would.
pub fn error_response(origin: &Message, text: impl Into<String>) -> Message {
    route_from_origin(origin, MessageType::Error, None, Some(text.into()))
}

/// Builds an error response with a `[prefix] text` message.
pub fn error_response_with_prefix(
    origin: &Message,
    prefix: &str,
    text: impl AsRef<str>,
) -> Message {
    error_response(origin, format!("[{prefix}] {}", text.as_ref()))
}

fn route_from_origin(
    origin: &Message,
    kind: MessageType,
    payload: Option<Value>,
    error: Option<String>,
) -> Message {
    Message {
        kind,
        id: origin.id.clone(),
        payload,
        error,
        source: origin.target.clone(),
        target: origin.source.clone(),
        correlation_id: origin.correlation_id.clone(),
    }
}

/// Returns a pre-built error response if `value` is empty; otherwise `None`.
/// A thin composable guard so handler authors get a consistent error shape
/// for missing required fields.
pub fn require_field(origin: &Message, field_name: &str, value: &str) -> Option<Message> {
    if value.is_empty() {
        Some(error_response(
            origin,
            format!("missing required field: {field_name}"),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Message {
        Message::request("RPCGetCVE")
            .with_source("gateway")
            .with_target("cve-worker")
            .with_correlation_id("c-rpc-7")
    }

    #[test]
    fn success_response_swaps_source_and_target() {
        let reply = success_response_value(&origin(), serde_json::json!({"ok": true}));
        assert_eq!(reply.source.as_deref(), Some("cve-worker"));
        assert_eq!(reply.target.as_deref(), Some("gateway"));
        assert_eq!(reply.correlation_id.as_deref(), Some("c-rpc-7"));
        assert_eq!(reply.id, "RPCGetCVE");
    }

    #[test]
    fn error_response_carries_text_and_routing() {
        let reply = error_response(&origin(), "boom");
        assert_eq!(reply.error.as_deref(), Some("boom"));
        assert_eq!(reply.correlation_id.as_deref(), Some("c-rpc-7"));
    }

    #[test]
    fn require_field_only_fires_on_empty() {
        assert!(require_field(&origin(), "cve_id", "").is_some());
        assert!(require_field(&origin(), "cve_id", "CVE-2024-0001").is_none());
    }
}
