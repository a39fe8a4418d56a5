//! Typed decoding of the control events the router interprets.
//!
//! Only three event types carry meaning for the broker. Everything else is
//! an opaque payload that gets broadcast. Decoding happens once, here; past
//! this boundary nothing reaches into `data` by field name.

use serde_json::{Map, Value};

use crate::envelope::Envelope;
use crate::errors::ProtocolError;

/// Peer presents the shared secret.
pub const MODULE_AUTHENTICATE: &str = "module:authenticate";
/// Broker acknowledges authentication.
pub const MODULE_AUTHENTICATED: &str = "module:authenticated";
/// Peer claims a `(name, index)` slot.
pub const MODULE_ANNOUNCE: &str = "module:announce";
/// Broker forwards configuration to an addressed module.
pub const MODULE_CONFIGURE: &str = "module:configure";
/// UI asks the broker to configure one module instance.
pub const UI_CONFIGURE: &str = "ui:configure";
/// Broker reports a failure.
pub const ERROR: &str = "error";

/// Optional slot index; `None` is the singleton instance of a module name.
pub type SlotIndex = Option<u64>;

/// Which handler an envelope is routed to, known from `type` alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// `module:authenticate`
    Authenticate,
    /// `module:announce`
    Announce,
    /// `ui:configure`
    Configure,
    /// Anything else.
    Opaque,
}

impl EventKind {
    /// Classify an event type string.
    pub fn of(event_type: &str) -> Self {
        match event_type {
            MODULE_AUTHENTICATE => Self::Authenticate,
            MODULE_ANNOUNCE => Self::Announce,
            UI_CONFIGURE => Self::Configure,
            _ => Self::Opaque,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Announce => "announce",
            Self::Configure => "configure",
            Self::Opaque => "broadcast",
        }
    }
}

/// Validated `module:announce` payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceRequest {
    /// Module name, never empty.
    pub name: String,
    /// Instance slot.
    pub index: SlotIndex,
}

/// Validated `ui:configure` payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigureRequest {
    /// Target module name, never empty.
    pub module_name: String,
    /// Target instance slot.
    pub module_index: SlotIndex,
    /// Configuration forwarded verbatim, if the sender supplied one.
    pub config: Option<Value>,
    /// Sender's declared source, forwarded verbatim.
    pub source: Option<String>,
}

/// A decoded inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// `module:authenticate`; `token` is `None` when absent or not a string.
    Authenticate {
        /// Presented token.
        token: Option<String>,
    },
    /// `module:announce`
    Announce(AnnounceRequest),
    /// `ui:configure`
    Configure(ConfigureRequest),
    /// Any other type, routed by default broadcast.
    Opaque(Envelope),
}

impl ClientEvent {
    /// Decode and validate an envelope.
    pub fn decode(envelope: Envelope) -> Result<Self, ProtocolError> {
        let empty = Map::new();
        match EventKind::of(&envelope.event_type) {
            EventKind::Authenticate => {
                let data = envelope.data.as_object().unwrap_or(&empty);
                let token = data.get("token").and_then(Value::as_str).map(str::to_owned);
                Ok(Self::Authenticate { token })
            }
            EventKind::Announce => {
                let data = envelope.data.as_object().unwrap_or(&empty);
                let name = required_name(data, "name", MODULE_ANNOUNCE)?;
                let index = optional_index(data, "index", MODULE_ANNOUNCE)?;
                Ok(Self::Announce(AnnounceRequest { name, index }))
            }
            EventKind::Configure => {
                let data = envelope.data.as_object().unwrap_or(&empty);
                let module_name = required_name(data, "moduleName", UI_CONFIGURE)?;
                let module_index = optional_index(data, "moduleIndex", UI_CONFIGURE)?;
                let config = data.get("config").cloned();
                Ok(Self::Configure(ConfigureRequest {
                    module_name,
                    module_index,
                    config,
                    source: envelope.source,
                }))
            }
            EventKind::Opaque => Ok(Self::Opaque(envelope)),
        }
    }
}

fn required_name(
    data: &Map<String, Value>,
    field: &'static str,
    event: &'static str,
) -> Result<String, ProtocolError> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or(ProtocolError::EmptyField { field, event })
}

fn optional_index(
    data: &Map<String, Value>,
    field: &'static str,
    event: &'static str,
) -> Result<SlotIndex, ProtocolError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_u64() {
                return Ok(Some(i));
            }
            // Integral floats (`2.0`) count as integers. `u64::MAX as f64`
            // rounds up to 2^64, which is already out of range.
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 => {
                    Ok(Some(f as u64))
                }
                _ => Err(ProtocolError::InvalidIndex { field, event }),
            }
        }
        Some(_) => Err(ProtocolError::InvalidIndex { field, event }),
    }
}
