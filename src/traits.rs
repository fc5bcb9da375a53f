use std::future::Future;

use url::Url;

use crate::catalog::Placement;
use crate::postback::RewardNotification;
use crate::store::{CasOutcome, SessionRecord};
use crate::types::{PlacementId, SessionId, SessionState};

/// Error type returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer-provided placement catalog.
///
/// Read-only from the crate's point of view. The callback URL it returns is
/// server-side data and is never echoed to clients.
///
/// # Example
///
/// ```rust,ignore
/// impl Catalog for MyCatalog {
///     async fn lookup(&self, placement_id: &PlacementId) -> Result<Option<Placement>, BoxError> {
///         Ok(self.db.find_placement(placement_id.as_str()).await?)
///     }
/// }
/// ```
pub trait Catalog: Send + Sync + 'static {
    /// Returns `None` when the placement does not exist.
    fn lookup(
        &self,
        placement_id: &PlacementId,
    ) -> impl Future<Output = Result<Option<Placement>, BoxError>> + Send;
}

/// Consumer-provided session persistence.
///
/// Every transition goes through [`compare_and_swap`](SessionStore::compare_and_swap),
/// which must be atomic per session: the swap succeeds only while the stored
/// record still carries `expected_version`. No lock across sessions is needed.
pub trait SessionStore: Send + Sync + 'static {
    /// Persist a freshly issued session.
    fn insert(
        &self,
        record: SessionRecord,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Look up a session by ID.
    fn get(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<SessionRecord>, BoxError>> + Send;

    /// Move the session to `new_state` if its version is still `expected_version`.
    fn compare_and_swap(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        new_state: SessionState,
        updated_at: i64,
    ) -> impl Future<Output = Result<CasOutcome, BoxError>> + Send;

    /// Drop sessions issued before `issued_before`. Returns how many were removed.
    fn purge_expired(
        &self,
        issued_before: i64,
    ) -> impl Future<Output = Result<usize, BoxError>> + Send;
}

/// Outbound channel to a placement owner's reward callback.
///
/// One call is one delivery attempt; retries are the dispatcher's job.
pub trait PostbackTransport: Send + Sync + 'static {
    fn send(
        &self,
        callback_url: &Url,
        notification: &RewardNotification,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}
