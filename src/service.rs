use std::sync::Arc;

use crate::config::RewardConfig;
use crate::error::Error;
use crate::events::{Ack, EventProcessor, EventReport};
use crate::postback::PostbackQueue;
use crate::session::{Ad, SessionIssuer, SessionToken};
use crate::traits::{Catalog, SessionStore};
use crate::types::{PlacementId, SessionId, UserId, unix_now};
use crate::validator::EventTicket;

/// The protocol core: issuance plus event handling over shared collaborators.
///
/// # Example
///
/// ```rust,ignore
/// let config = RewardConfig::from_env()?;
/// let transport = HttpTransport::new(config.postback().request_timeout())?;
/// let (queue, dispatcher) = Dispatcher::new(transport, config.postback().retry().clone())
///     .spawn(config.postback().queue_capacity());
/// let service = RewardService::new(&config, catalog, InMemorySessionStore::new(), queue)?;
///
/// let (ad, token) = service.request_ad(&"demo_block".into(), &"u1".into()).await?;
/// ```
pub struct RewardService<C, S> {
    issuer: SessionIssuer<C, S>,
    events: EventProcessor<S>,
}

impl<C, S> Clone for RewardService<C, S> {
    fn clone(&self) -> Self {
        Self {
            issuer: self.issuer.clone(),
            events: self.events.clone(),
        }
    }
}

impl<C: Catalog, S: SessionStore> RewardService<C, S> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        config: &RewardConfig,
        catalog: C,
        store: S,
        postbacks: PostbackQueue,
    ) -> Result<Self, Error> {
        config.validate()?;
        let store = Arc::new(store);
        Ok(Self {
            issuer: SessionIssuer::new(config, Arc::new(catalog), store.clone())?,
            events: EventProcessor::new(config, store, postbacks)?,
        })
    }

    /// # Errors
    ///
    /// See [`SessionIssuer::issue_at`].
    pub async fn request_ad(
        &self,
        placement_id: &PlacementId,
        user_id: &UserId,
    ) -> Result<(Ad, SessionToken), Error> {
        self.issuer.issue(placement_id, user_id).await
    }

    /// # Errors
    ///
    /// See [`EventProcessor::report_event_at`].
    pub async fn report_event(&self, report: &EventReport) -> Result<Ack, Error> {
        self.events.report_event(report).await
    }

    /// # Errors
    ///
    /// See [`EventProcessor::ticket`].
    pub async fn event_ticket(
        &self,
        session_id: &SessionId,
        issuance_signature: &str,
    ) -> Result<EventTicket, Error> {
        self.events.ticket(session_id, issuance_signature).await
    }

    /// Drops sessions past their TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on store failure.
    pub async fn purge_expired(&self) -> Result<usize, Error> {
        self.events.purge_expired_at(unix_now()).await
    }

    #[must_use]
    pub fn issuer(&self) -> &SessionIssuer<C, S> {
        &self.issuer
    }

    #[must_use]
    pub fn events(&self) -> &EventProcessor<S> {
        &self.events
    }
}
