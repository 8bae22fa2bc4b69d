use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum serialized size of a single frame, enforced by the line reader.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Dispatch discriminator carried by every [`Message`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Error,
}

impl MessageType {
    /// The string key this type is registered/looked-up under in a
    /// [`crate::registry::HandlerRegistry`].
    pub fn as_pattern(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Error => "error",
        }
    }
}

/// The unit of wire traffic between broker and worker.
///
/// Serializes as a single line of JSON terminated by `\n`. Unknown fields on
/// input are ignored; absent optional fields are elided on output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Method name for requests; echoed into the matching response/error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn request(id: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Request,
            id: id.into(),
            payload: None,
            error: None,
            source: None,
            target: None,
            correlation_id: None,
        }
    }

    pub fn event(id: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Event,
            ..Self::request(id)
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Serializes to a single `\n`-terminated line. Fails only if `payload`
    /// contains values `serde_json` cannot represent (e.g. non-finite floats).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses a single line (without its trailing newline). Unknown fields
    /// are ignored by `serde`'s default behavior; this is a thin wrapper so
    /// callers have one place to point at for "how a line becomes a Message."
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// The pattern a dispatcher should look up first for this message:
    /// responses/errors key on `type` first, falling back to `id`;
    /// everything else keys on `id` first, falling back on `type`.
    pub fn lookup_order(&self) -> [&str; 2] {
        match self.kind {
            MessageType::Response | MessageType::Error => [self.kind.as_pattern(), &self.id],
            MessageType::Request | MessageType::Event => [&self.id, self.kind.as_pattern()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_elides_absent_optionals() {
        let msg = Message::request("RPCGetCVE")
            .with_correlation_id("c-rpc-1")
            .with_payload(serde_json::json!({"id": "CVE-2024-0001"}));
        let line = msg.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed = Message::from_line(line.trim_end()).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.correlation_id, msg.correlation_id);
        assert_eq!(parsed.payload, msg.payload);
        assert!(parsed.error.is_none());
        assert!(parsed.source.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored_on_ingest() {
        let line = r#"{"type":"event","id":"tick","unexpected":42}"#;
        let parsed = Message::from_line(line).unwrap();
        assert_eq!(parsed.kind, MessageType::Event);
        assert_eq!(parsed.id, "tick");
    }

    #[test]
    fn lookup_order_prefers_type_for_response_and_error() {
        let resp = Message {
            kind: MessageType::Response,
            id: "RPCGetCVE".into(),
            ..Message::request("")
        };
        assert_eq!(resp.lookup_order(), ["response", "RPCGetCVE"]);

        let req = Message::request("RPCGetCVE");
        assert_eq!(req.lookup_order(), ["RPCGetCVE", "request"]);
    }
}
