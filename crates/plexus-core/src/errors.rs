//! Client-visible protocol failures.
//!
//! The `Display` text of every variant is exactly what goes out in the
//! `data.message` field of an `error` event, so peers can match on it.

/// A validation, authorization, or lookup failure reported to one peer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Valid JSON, but not a `{ type, data, source }` envelope.
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(String),

    /// `module:authenticate` carried the wrong token.
    #[error("invalid token")]
    InvalidToken,

    /// A default-routed event arrived before the peer authenticated.
    #[error("not authenticated")]
    NotAuthenticated,

    /// `module:announce` arrived before the peer authenticated.
    #[error("must authenticate before announcing")]
    MustAuthenticateBeforeAnnouncing,

    /// A required string field was missing, not a string, or empty.
    #[error("the field '{field}' must be a non-empty string for event '{event}'")]
    EmptyField {
        /// Offending field name.
        field: &'static str,
        /// Event type the field belongs to.
        event: &'static str,
    },

    /// An index field was present but not a non-negative integer.
    #[error("the field '{field}' must be a non-negative integer for event '{event}'")]
    InvalidIndex {
        /// Offending field name.
        field: &'static str,
        /// Event type the field belongs to.
        event: &'static str,
    },

    /// `ui:configure` addressed a slot nobody occupies.
    #[error("module not found, it hasn't announced itself or the name is incorrect")]
    ModuleNotFound,
}

impl ProtocolError {
    /// Short machine-readable label, used for log fields and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::InvalidToken => "invalid_token",
            Self::NotAuthenticated => "not_authenticated",
            Self::MustAuthenticateBeforeAnnouncing => "must_authenticate",
            Self::EmptyField { .. } => "empty_field",
            Self::InvalidIndex { .. } => "invalid_index",
            Self::ModuleNotFound => "module_not_found",
        }
    }

    /// Whether the failure came from a frame that could not be decoded at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::InvalidJson(_) | Self::InvalidEnvelope(_))
    }
}
