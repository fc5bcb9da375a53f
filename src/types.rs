use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque, unguessable session identifier.
///
/// Generated from 24 random bytes (192 bits) rendered as unpadded base64url,
/// so it doubles as a lookup key and as a MAC binding target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Mints a fresh identifier from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 24] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Host-supplied user identifier. The crate does not verify it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Catalog key of an ad slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct PlacementId(pub String);

impl PlacementId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlacementId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct CreativeId(pub String);

impl From<&str> for CreativeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Playback lifecycle event reported by the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[display("start")]
    Start,
    #[display("complete")]
    Complete,
    #[display("close")]
    Close,
    #[display("error")]
    Error,
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "complete" => Ok(Self::Complete),
            "close" => Ok(Self::Close),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidField {
                field: "event_type",
                reason: format!("unknown event type `{other}`"),
            }),
        }
    }
}

/// Lifecycle state of a session. See [`crate::state`] for the legal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[display("issued")]
    Issued,
    #[display("started")]
    Started,
    #[display("completed")]
    Completed,
    #[display("closed")]
    Closed,
    #[display("errored")]
    Errored,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Closed | Self::Errored)
    }
}

/// Current wall-clock time as Unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
