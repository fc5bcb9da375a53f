use crate::types::{EventType, PlacementId, SessionId, SessionState};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("placement not found: {0}")]
    PlacementNotFound(PlacementId),

    #[error("placement {0} has no eligible creatives")]
    NoCreatives(PlacementId),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("stale event: timestamp {timestamp} is outside ±{skew_secs}s of server time {now}")]
    StaleEvent {
        timestamp: i64,
        now: i64,
        skew_secs: i64,
    },

    #[error("illegal transition: `{event}` is not allowed from state `{state}`")]
    IllegalTransition {
        state: SessionState,
        event: EventType,
    },

    #[error("session expired or unknown: {0}")]
    SessionExpired(SessionId),

    #[error("session store error: {0}")]
    Store(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("callback returned HTTP {status}: {detail}")]
    Callback { status: u16, detail: String },

    #[error("postback delivery failed for session {session_id} after {attempts} attempt(s): {reason}")]
    PostbackDeliveryFailed {
        session_id: SessionId,
        attempts: u32,
        reason: String,
    },

    #[error("postback worker failed: {0}")]
    Worker(String),

    #[cfg(feature = "http-postback")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True for the kinds a client can cause by sending a bad request.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::PlacementNotFound(_)
                | Self::NoCreatives(_)
                | Self::InvalidField { .. }
                | Self::InvalidSignature
                | Self::StaleEvent { .. }
                | Self::IllegalTransition { .. }
                | Self::SessionExpired(_)
        )
    }
}
