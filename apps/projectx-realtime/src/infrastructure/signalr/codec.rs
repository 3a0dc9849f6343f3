//! SignalR JSON Hub Protocol Codec
//!
//! The gateway hubs speak the SignalR JSON protocol over WebSocket. Every
//! record is a JSON object terminated by the record separator `0x1E`, and a
//! single WebSocket message may carry several records.
//!
//! ```text
//! → {"protocol":"json","version":1}␞
//! ← {}␞
//! → {"type":1,"target":"SubscribeContractQuotes","arguments":["CON.F.US.ENQ.H25"]}␞
//! ← {"type":1,"target":"GatewayQuote","arguments":["CON.F.US.ENQ.H25",{...}]}␞
//! ← {"type":6}␞
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record separator terminating every SignalR record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u64 = 1;
const STREAM_ITEM: u64 = 2;
const COMPLETION: u64 = 3;
const STREAM_INVOCATION: u64 = 4;
const CANCEL_INVOCATION: u64 = 5;
const PING: u64 = 6;
const CLOSE: u64 = 7;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Invalid record format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server-to-client call of a named event.
    Invocation {
        /// Event name (e.g. `GatewayQuote`).
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
    },
    /// Item of a streaming invocation.
    StreamItem,
    /// Completion of an invocation.
    Completion {
        /// Error text, if the invocation failed.
        error: Option<String>,
    },
    /// Streaming invocation request.
    StreamInvocation,
    /// Cancellation of a streaming invocation.
    CancelInvocation,
    /// Keep-alive.
    Ping,
    /// Server is closing the connection.
    Close {
        /// Error text, if the close was caused by an error.
        error: Option<String>,
        /// Whether the server allows the client to reconnect.
        allow_reconnect: bool,
    },
    /// A record with a type number this client does not know.
    Unknown(u64),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<u64>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    error: Option<String>,
    #[serde(rename = "allowReconnect", default)]
    allow_reconnect: bool,
}

#[derive(Debug, Deserialize)]
struct RawHandshakeResponse {
    error: Option<String>,
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Serialize)]
struct InvocationMessage<'a> {
    #[serde(rename = "type")]
    kind: u64,
    target: &'a str,
    arguments: &'a [Value],
}

/// JSON codec for the SignalR hub protocol.
#[derive(Debug, Default, Clone)]
pub struct SignalRCodec;

impl SignalRCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Split a WebSocket message into its records, skipping empty ones.
    pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
        text.split(RECORD_SEPARATOR)
            .map(str::trim)
            .filter(|record| !record.is_empty())
    }

    /// Encode the client handshake record.
    pub fn handshake_request(&self) -> Result<String, CodecError> {
        let body = serde_json::to_string(&HandshakeRequest {
            protocol: "json",
            version: 1,
        })?;
        Ok(terminate(body))
    }

    /// Decode the server handshake response.
    ///
    /// Returns the server's error text when the handshake was refused.
    pub fn decode_handshake(&self, record: &str) -> Result<Option<String>, CodecError> {
        let response: RawHandshakeResponse = serde_json::from_str(record)?;
        Ok(response.error)
    }

    /// Encode a non-blocking invocation (no invocation id, no reply).
    pub fn encode_invocation(&self, target: &str, arguments: &[Value]) -> Result<String, CodecError> {
        let body = serde_json::to_string(&InvocationMessage {
            kind: INVOCATION,
            target,
            arguments,
        })?;
        Ok(terminate(body))
    }

    /// Encode a keep-alive record.
    #[must_use]
    pub fn encode_ping(&self) -> String {
        terminate(format!("{{\"type\":{PING}}}"))
    }

    /// Encode a client close record.
    #[must_use]
    pub fn encode_close(&self) -> String {
        terminate(format!("{{\"type\":{CLOSE}}}"))
    }

    /// Decode a single record (without separator).
    pub fn decode(&self, record: &str) -> Result<HubMessage, CodecError> {
        let value: Value = serde_json::from_str(record)?;
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {record}"
            )));
        }

        let raw: RawMessage = serde_json::from_value(value)?;
        let kind = raw.kind.ok_or(CodecError::MissingField("type"))?;

        let message = match kind {
            INVOCATION => HubMessage::Invocation {
                target: raw.target.ok_or(CodecError::MissingField("target"))?,
                arguments: raw.arguments,
            },
            STREAM_ITEM => HubMessage::StreamItem,
            COMPLETION => HubMessage::Completion { error: raw.error },
            STREAM_INVOCATION => HubMessage::StreamInvocation,
            CANCEL_INVOCATION => HubMessage::CancelInvocation,
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect,
            },
            other => HubMessage::Unknown(other),
        };
        Ok(message)
    }
}

fn terminate(mut body: String) -> String {
    body.push(RECORD_SEPARATOR);
    body
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn handshake_request_is_json_protocol_v1() {
        let codec = SignalRCodec::new();
        assert_eq!(
            codec.handshake_request().unwrap(),
            "{\"protocol\":\"json\",\"version\":1}\u{1e}"
        );
    }

    #[test]
    fn handshake_accepted() {
        let codec = SignalRCodec::new();
        assert_eq!(codec.decode_handshake("{}").unwrap(), None);
    }

    #[test]
    fn handshake_refused() {
        let codec = SignalRCodec::new();
        assert_eq!(
            codec
                .decode_handshake(r#"{"error":"Requested protocol 'json' is not available."}"#)
                .unwrap()
                .as_deref(),
            Some("Requested protocol 'json' is not available.")
        );
    }

    #[test]
    fn split_records_skips_empty_segments() {
        let frame = "{\"type\":6}\u{1e}{\"type\":6}\u{1e}\u{1e}";
        let records: Vec<&str> = SignalRCodec::split_records(frame).collect();
        assert_eq!(records, vec!["{\"type\":6}", "{\"type\":6}"]);
    }

    #[test]
    fn encode_invocation_has_no_invocation_id() {
        let codec = SignalRCodec::new();
        let text = codec
            .encode_invocation("SubscribeContractQuotes", &[json!("CON.F.US.ENQ.H25")])
            .unwrap();

        assert!(text.ends_with(RECORD_SEPARATOR));
        let value: Value = serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(
            value,
            json!({"type": 1, "target": "SubscribeContractQuotes", "arguments": ["CON.F.US.ENQ.H25"]})
        );
        assert!(value.get("invocationId").is_none());
    }

    #[test]
    fn decode_invocation() {
        let codec = SignalRCodec::new();
        let message = codec
            .decode(r#"{"type":1,"target":"GatewayQuote","arguments":["CON.F.US.ENQ.H25",{"bid":100,"ask":101}]}"#)
            .unwrap();

        assert_eq!(
            message,
            HubMessage::Invocation {
                target: "GatewayQuote".to_string(),
                arguments: vec![json!("CON.F.US.ENQ.H25"), json!({"bid": 100, "ask": 101})],
            }
        );
    }

    #[test]
    fn decode_invocation_without_target_fails() {
        let codec = SignalRCodec::new();
        assert!(matches!(
            codec.decode(r#"{"type":1,"arguments":[]}"#),
            Err(CodecError::MissingField("target"))
        ));
    }

    #[test]
    fn decode_ping_and_close() {
        let codec = SignalRCodec::new();
        assert_eq!(codec.decode(r#"{"type":6}"#).unwrap(), HubMessage::Ping);
        assert_eq!(
            codec
                .decode(r#"{"type":7,"error":"Server timeout","allowReconnect":true}"#)
                .unwrap(),
            HubMessage::Close {
                error: Some("Server timeout".to_string()),
                allow_reconnect: true,
            }
        );
    }

    #[test]
    fn decode_unknown_type() {
        let codec = SignalRCodec::new();
        assert_eq!(codec.decode(r#"{"type":42}"#).unwrap(), HubMessage::Unknown(42));
    }

    #[test]
    fn decode_rejects_non_objects() {
        let codec = SignalRCodec::new();
        assert!(matches!(codec.decode("[1,2]"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec.decode("{}"), Err(CodecError::MissingField("type"))));
    }

    #[test]
    fn ping_and_close_records() {
        let codec = SignalRCodec::new();
        assert_eq!(codec.encode_ping(), "{\"type\":6}\u{1e}");
        assert_eq!(codec.encode_close(), "{\"type\":7}\u{1e}");
    }
}
