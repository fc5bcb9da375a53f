use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::traits::{BoxError, SessionStore};
use crate::types::{PlacementId, SessionId, SessionState, UserId};

/// Server-side view of a session.
///
/// Everything except `state`, `version` and `updated_at` is fixed at issuance,
/// and `signature` is the issuance MAC over those fixed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub placement_id: PlacementId,
    /// Reward callback of the placement the session was issued for.
    pub callback_url: Url,
    pub issued_at: i64,
    pub signature: String,
    pub state: SessionState,
    /// Bumped on every transition; the compare-and-swap token.
    pub version: u64,
    pub updated_at: i64,
}

impl SessionRecord {
    #[must_use]
    pub fn is_expired(&self, now: i64, ttl_secs: i64) -> bool {
        now.saturating_sub(self.issued_at) > ttl_secs
    }
}

/// Result of [`SessionStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap happened; carries the updated record.
    Swapped(SessionRecord),
    /// Another writer got there first; carries the current record.
    Conflict(SessionRecord),
    /// No such session.
    Missing,
}

/// Process-local session store.
///
/// The map lock is held only for the duration of a single lookup or swap and
/// never across an await point.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn len(&self) -> Result<usize, BoxError> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| "session store lock poisoned")?
            .len())
    }
}

impl SessionStore for InMemorySessionStore {
    async fn insert(&self, record: SessionRecord) -> Result<(), BoxError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| "session store lock poisoned")?;
        if sessions.contains_key(&record.session_id) {
            return Err(format!("duplicate session id {}", record.session_id).into());
        }
        sessions.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, BoxError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| "session store lock poisoned")?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        new_state: SessionState,
        updated_at: i64,
    ) -> Result<CasOutcome, BoxError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| "session store lock poisoned")?;
        let Some(record) = sessions.get_mut(session_id) else {
            return Ok(CasOutcome::Missing);
        };
        if record.version != expected_version {
            return Ok(CasOutcome::Conflict(record.clone()));
        }
        record.state = new_state;
        record.version += 1;
        record.updated_at = updated_at;
        Ok(CasOutcome::Swapped(record.clone()))
    }

    async fn purge_expired(&self, issued_before: i64) -> Result<usize, BoxError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| "session store lock poisoned")?;
        let before = sessions.len();
        sessions.retain(|_, record| record.issued_at >= issued_before);
        Ok(before - sessions.len())
    }
}
