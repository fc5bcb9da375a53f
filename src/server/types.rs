use serde::{Deserialize, Serialize};

use crate::session::{Ad, SessionToken};
use crate::types::{EventType, PlacementId, SessionId, UserId};

/// Identity supplied by the embedding host. Not verified here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: UserId,
}

/// Body of `POST /ads/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdRequest {
    pub placement_id: PlacementId,
    pub user_context: UserContext,
}

/// Session credentials as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub signature: String,
    pub timestamp: i64,
}

impl From<SessionToken> for SessionView {
    fn from(token: SessionToken) -> Self {
        Self {
            id: token.session_id,
            signature: token.signature,
            timestamp: token.issued_at,
        }
    }
}

/// Body of a successful `POST /ads/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdResponse {
    pub ad: Ad,
    pub session: SessionView,
}

/// Body of `POST /ads/event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub session_id: SessionId,
    pub event_type: EventType,
    pub signature: String,
    pub timestamp: i64,
}

/// Body of `POST /ads/ticket`: the issuance credentials from `/ads/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRequest {
    pub session_id: SessionId,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}
