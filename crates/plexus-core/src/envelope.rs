//! The wire envelope: one JSON object per WebSocket text frame.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ProtocolError;
use crate::events::{ERROR, MODULE_AUTHENTICATED, MODULE_CONFIGURE};

/// `source` stamped on every reply the broker originates.
pub const SERVER_SOURCE: &str = "server";

/// `{ "type": string, "data": any, "source"?: string }`.
///
/// `source` names the logical origin category (a UI frontend, a plugin, or
/// the server) and is opaque to the router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type, e.g. `module:announce` or an application-defined name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Logical origin of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Envelope {
    /// Decode one frame.
    ///
    /// Distinguishes "not JSON at all" from "JSON of the wrong shape" so the
    /// error reply tells the peer which one it got wrong.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::InvalidEnvelope(
                "expected a JSON object".into(),
            ));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))
    }

    /// Build a server-originated event.
    pub fn server(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            source: Some(SERVER_SOURCE.to_owned()),
        }
    }

    /// `module:authenticated` acknowledgement.
    pub fn authenticated() -> Self {
        Self::server(MODULE_AUTHENTICATED, json!({ "authenticated": true }))
    }

    /// Generic `error` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::server(ERROR, json!({ "message": message.into() }))
    }

    /// `error` reply carrying a protocol failure's wire text.
    pub fn from_protocol_error(err: &ProtocolError) -> Self {
        Self::error(err.to_string())
    }

    /// `module:configure` forwarded to an addressed peer.
    ///
    /// `source` is the sender's declared source, passed through untouched.
    pub fn configure(config: Option<Value>, source: Option<String>) -> Self {
        let data = match config {
            Some(config) => json!({ "config": config }),
            None => json!({}),
        };
        Self {
            event_type: MODULE_CONFIGURE.to_owned(),
            data,
            source,
        }
    }

    /// Serialize to the text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_envelope() {
        let env = Envelope::parse(r#"{"type":"chat","data":{"text":"hi"},"source":"stage-web-ui"}"#)
            .unwrap();
        assert_eq!(env.event_type, "chat");
        assert_eq!(env.data["text"], "hi");
        assert_eq!(env.source.as_deref(), Some("stage-web-ui"));
    }

    #[test]
    fn parse_without_data_or_source() {
        let env = Envelope::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(env.event_type, "ping");
        assert!(env.data.is_null());
        assert!(env.source.is_none());
    }

    #[test]
    fn parse_ignores_unknown_top_level_fields() {
        let env = Envelope::parse(r#"{"type":"x","data":{},"metadata":{"id":1}}"#).unwrap();
        assert_eq!(env.event_type, "x");
    }

    #[test]
    fn parse_rejects_non_json() {
        let err = Envelope::parse("not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert!(err.to_string().starts_with("invalid JSON: "));
    }

    #[test]
    fn parse_rejects_empty_frame() {
        let err = Envelope::parse("").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn parse_rejects_array() {
        let err = Envelope::parse("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = Envelope::parse(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }

    #[test]
    fn parse_rejects_non_string_type() {
        let err = Envelope::parse(r#"{"type":42}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }

    #[test]
    fn authenticated_shape() {
        let v: Value = serde_json::from_str(&Envelope::authenticated().to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "module:authenticated");
        assert_eq!(v["data"]["authenticated"], true);
        assert_eq!(v["source"], "server");
    }

    #[test]
    fn error_shape() {
        let v: Value =
            serde_json::from_str(&Envelope::from_protocol_error(&ProtocolError::InvalidToken).to_json().unwrap())
                .unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["data"]["message"], "invalid token");
    }

    #[test]
    fn configure_preserves_source() {
        let env = Envelope::configure(Some(json!({"volume": 0.5})), Some("stage-web-ui".into()));
        assert_eq!(env.event_type, "module:configure");
        assert_eq!(env.data, json!({"config": {"volume": 0.5}}));
        assert_eq!(env.source.as_deref(), Some("stage-web-ui"));
    }

    #[test]
    fn configure_without_source_omits_field() {
        let json = Envelope::configure(Some(json!({})), None).to_json().unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert!(v.get("source").is_none());
    }

    #[test]
    fn configure_without_config_sends_empty_data() {
        let env = Envelope::configure(None, None);
        assert_eq!(env.data, json!({}));
    }
}
