use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::error::Error;
use crate::postback::{PostbackJob, PostbackQueue};
use crate::state::Transition;
use crate::store::CasOutcome;
use crate::traits::SessionStore;
use crate::types::{EventType, SessionId, SessionState, unix_now};
use crate::validator::{EventTicket, SessionValidator};

/// Inbound lifecycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
    pub session_id: SessionId,
    pub event_type: EventType,
    pub signature: String,
    pub timestamp: i64,
}

/// Successful handling of an [`EventReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub session_id: SessionId,
    pub state: SessionState,
    /// Whether this report queued the reward postback.
    pub postback_enqueued: bool,
}

/// Drives sessions through their lifecycle.
///
/// Checks run in order (signature, freshness, liveness, issuance integrity,
/// transition legality) and none of them writes. The only write is the
/// versioned compare-and-swap, so concurrent duplicates of the same report
/// resolve to exactly one transition.
pub struct EventProcessor<S> {
    validator: SessionValidator,
    store: Arc<S>,
    postbacks: PostbackQueue,
}

impl<S> Clone for EventProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            validator: self.validator.clone(),
            store: self.store.clone(),
            postbacks: self.postbacks.clone(),
        }
    }
}

impl<S: SessionStore> EventProcessor<S> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the signing key is unusable.
    pub fn new(
        config: &RewardConfig,
        store: Arc<S>,
        postbacks: PostbackQueue,
    ) -> Result<Self, Error> {
        Ok(Self {
            validator: SessionValidator::new(config)?,
            store,
            postbacks,
        })
    }

    /// # Errors
    ///
    /// See [`report_event_at`](Self::report_event_at).
    pub async fn report_event(&self, report: &EventReport) -> Result<Ack, Error> {
        self.report_event_at(report, unix_now()).await
    }

    /// Applies `report` as seen at server time `now`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSignature`] if the event MAC or the stored issuance MAC fails
    /// - [`Error::StaleEvent`] if the timestamp is outside the skew window
    /// - [`Error::SessionExpired`] if the session is unknown or past its TTL
    /// - [`Error::IllegalTransition`] if the event is not a legal edge, including replays
    /// - [`Error::Store`] on store failure
    pub async fn report_event_at(&self, report: &EventReport, now: i64) -> Result<Ack, Error> {
        let session_id = &report.session_id;

        if let Err(e) =
            self.validator
                .check_event_signature(session_id, report.timestamp, &report.signature)
        {
            tracing::warn!(
                session_id = %session_id,
                event_type = %report.event_type,
                "Rejected event with invalid signature"
            );
            return Err(e);
        }
        self.validator.check_freshness(report.timestamp, now)?;

        loop {
            let record = self
                .store
                .get(session_id)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
            let record = self.validator.check_live(session_id, record, now)?;
            if let Err(e) = self.validator.verify_issuance(&record) {
                tracing::error!(session_id = %session_id, "Stored session failed issuance check");
                return Err(e);
            }

            let transition = Transition::resolve(record.state, report.event_type)?;

            let outcome = self
                .store
                .compare_and_swap(session_id, record.version, transition.to, now)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

            match outcome {
                CasOutcome::Swapped(updated) => {
                    tracing::info!(
                        session_id = %session_id,
                        from = %transition.from,
                        to = %transition.to,
                        "Session transitioned"
                    );
                    // No await between the commit and the enqueue.
                    let postback_enqueued = transition.grants_reward()
                        && self.enqueue_postback(PostbackJob::completed(
                            session_id.clone(),
                            updated.callback_url,
                        ));
                    return Ok(Ack {
                        session_id: session_id.clone(),
                        state: updated.state,
                        postback_enqueued,
                    });
                }
                CasOutcome::Conflict(current) => {
                    // Someone else moved the session; re-check against the new state.
                    tracing::debug!(
                        session_id = %session_id,
                        state = %current.state,
                        "Lost transition race, re-evaluating"
                    );
                }
                CasOutcome::Missing => return Err(Error::SessionExpired(session_id.clone())),
            }
        }
    }

    /// Issues event credentials to a holder of the session's issuance signature.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionExpired`] if the session is unknown or past its TTL
    /// - [`Error::InvalidSignature`] if `issuance_signature` does not match
    /// - [`Error::Store`] on store failure
    pub async fn ticket(
        &self,
        session_id: &SessionId,
        issuance_signature: &str,
    ) -> Result<EventTicket, Error> {
        self.ticket_at(session_id, issuance_signature, unix_now()).await
    }

    /// # Errors
    ///
    /// See [`ticket`](Self::ticket).
    pub async fn ticket_at(
        &self,
        session_id: &SessionId,
        issuance_signature: &str,
        now: i64,
    ) -> Result<EventTicket, Error> {
        let record = self
            .store
            .get(session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let record = self.validator.check_live(session_id, record, now)?;
        if let Err(e) = self.validator.verify_token(&record, issuance_signature) {
            tracing::warn!(session_id = %session_id, "Rejected ticket request with invalid token");
            return Err(e);
        }
        self.validator.mint_ticket(session_id, now)
    }

    /// Removes sessions older than the configured TTL as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on store failure.
    pub async fn purge_expired_at(&self, now: i64) -> Result<usize, Error> {
        self.store
            .purge_expired(now.saturating_sub(self.validator.session_ttl_secs()))
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    /// The transition already committed, so a closed queue is logged, never returned.
    fn enqueue_postback(&self, job: PostbackJob) -> bool {
        let session_id = job.session_id.clone();
        match self.postbacks.enqueue(job) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Reward postback not queued");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::postback::PostbackReceiver;
    use crate::signer::{Signer, SigningKey};
    use crate::store::{InMemorySessionStore, SessionRecord};
    use crate::traits::SessionStore;

    const NOW: i64 = 1_700_000_000;

    struct Harness {
        processor: EventProcessor<InMemorySessionStore>,
        store: Arc<InMemorySessionStore>,
        signer: Signer,
        jobs: PostbackReceiver,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_capacity(16)
        }

        fn with_capacity(capacity: usize) -> Self {
            let key = SigningKey::from_bytes(vec![0x33u8; 32]).unwrap();
            let config = RewardConfig::new(key.clone());
            let store = Arc::new(InMemorySessionStore::new());
            let (queue, jobs) = PostbackQueue::channel(capacity);
            Self {
                processor: EventProcessor::new(&config, store.clone(), queue).unwrap(),
                store,
                signer: Signer::new(&key).unwrap(),
                jobs,
            }
        }

        async fn issue(&self, id: &str) -> SessionId {
            let session_id = SessionId::from(id);
            let signature = self
                .signer
                .sign_issuance(&"u1".into(), &"demo_block".into(), &session_id, NOW)
                .unwrap();
            self.store
                .insert(SessionRecord {
                    session_id: session_id.clone(),
                    user_id: "u1".into(),
                    placement_id: "demo_block".into(),
                    callback_url: "https://owner.example.com/cb".parse().unwrap(),
                    issued_at: NOW,
                    signature,
                    state: SessionState::Issued,
                    version: 0,
                    updated_at: NOW,
                })
                .await
                .unwrap();
            session_id
        }

        fn report(
            &self,
            session_id: &SessionId,
            event_type: EventType,
            timestamp: i64,
        ) -> EventReport {
            EventReport {
                session_id: session_id.clone(),
                event_type,
                signature: self.signer.sign_event(session_id, timestamp).unwrap(),
                timestamp,
            }
        }

        async fn state(&self, session_id: &SessionId) -> SessionState {
            self.store.get(session_id).await.unwrap().unwrap().state
        }

        async fn start(&self, session_id: &SessionId) {
            self.processor
                .report_event_at(&self.report(session_id, EventType::Start, NOW), NOW)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn start_then_complete_enqueues_one_postback() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;

        let ack = h
            .processor
            .report_event_at(&h.report(&id, EventType::Start, NOW + 1), NOW + 1)
            .await
            .unwrap();
        assert_eq!(ack.state, SessionState::Started);
        assert!(!ack.postback_enqueued);

        let ack = h
            .processor
            .report_event_at(&h.report(&id, EventType::Complete, NOW + 31), NOW + 31)
            .await
            .unwrap();
        assert_eq!(ack.state, SessionState::Completed);
        assert!(ack.postback_enqueued);

        let job = h.jobs.try_recv().unwrap();
        assert_eq!(
            job,
            PostbackJob::completed(id, "https://owner.example.com/cb".parse().unwrap())
        );
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn replayed_complete_is_rejected() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;
        h.processor
            .report_event_at(&h.report(&id, EventType::Start, NOW + 1), NOW + 1)
            .await
            .unwrap();

        let complete = h.report(&id, EventType::Complete, NOW + 31);
        h.processor.report_event_at(&complete, NOW + 31).await.unwrap();
        let err = h.processor.report_event_at(&complete, NOW + 32).await.unwrap_err();

        assert!(matches!(
            err,
            Error::IllegalTransition {
                state: SessionState::Completed,
                event: EventType::Complete,
            }
        ));
        assert!(h.jobs.try_recv().is_ok());
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_signature_changes_nothing() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;

        let mut report = h.report(&id, EventType::Start, NOW);
        report.timestamp += 1;
        let err = h.processor.report_event_at(&report, NOW).await.unwrap_err();

        assert!(matches!(err, Error::InvalidSignature));
        assert_eq!(h.state(&id).await, SessionState::Issued);
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_event_changes_nothing() {
        let h = Harness::new();
        let id = h.issue("s1").await;

        let report = h.report(&id, EventType::Start, NOW);
        let err = h.processor.report_event_at(&report, NOW + 600).await.unwrap_err();

        assert!(matches!(err, Error::StaleEvent { .. }));
        assert_eq!(h.state(&id).await, SessionState::Issued);
    }

    #[tokio::test]
    async fn unknown_session_is_expired() {
        let h = Harness::new();
        let id = SessionId::from("ghost");

        let err = h
            .processor
            .report_event_at(&h.report(&id, EventType::Start, NOW), NOW)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn session_past_ttl_is_expired() {
        let h = Harness::new();
        let id = h.issue("s1").await;
        let later = NOW + 86_400 + 60;

        let err = h
            .processor
            .report_event_at(&h.report(&id, EventType::Start, later), later)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn close_is_recorded_without_postback() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;

        let ack = h
            .processor
            .report_event_at(&h.report(&id, EventType::Close, NOW), NOW)
            .await
            .unwrap();

        assert_eq!(ack.state, SessionState::Closed);
        assert!(!ack.postback_enqueued);
        assert!(h.jobs.try_recv().is_err());
        assert!(
            h.processor
                .report_event_at(&h.report(&id, EventType::Start, NOW), NOW)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn forged_stored_signature_is_rejected() {
        let h = Harness::new();
        let id = SessionId::from("s1");
        h.store
            .insert(SessionRecord {
                session_id: id.clone(),
                user_id: "u1".into(),
                placement_id: "demo_block".into(),
                callback_url: "https://owner.example.com/cb".parse().unwrap(),
                issued_at: NOW,
                signature: "00".repeat(32),
                state: SessionState::Issued,
                version: 0,
                updated_at: NOW,
            })
            .await
            .unwrap();

        let err = h
            .processor
            .report_event_at(&h.report(&id, EventType::Start, NOW), NOW)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSignature));
        assert_eq!(h.state(&id).await, SessionState::Issued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_completes_transition_once() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;
        h.processor
            .report_event_at(&h.report(&id, EventType::Start, NOW), NOW)
            .await
            .unwrap();

        let complete = h.report(&id, EventType::Complete, NOW + 30);
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let processor = h.processor.clone();
                let report = complete.clone();
                tokio::spawn(async move { processor.report_event_at(&report, NOW + 30).await })
            })
            .collect();

        let mut acks = 0;
        let mut illegal = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => acks += 1,
                Err(Error::IllegalTransition { .. }) => illegal += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(acks, 1);
        assert_eq!(illegal, 15);
        assert_eq!(h.state(&id).await, SessionState::Completed);
        assert!(h.jobs.try_recv().is_ok());
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn ticket_requires_issuance_signature() {
        let h = Harness::new();
        let id = h.issue("s1").await;
        let record = h.store.get(&id).await.unwrap().unwrap();

        let ticket = h
            .processor
            .ticket_at(&id, &record.signature, NOW + 5)
            .await
            .unwrap();
        assert_eq!(ticket.timestamp, NOW + 5);
        let report = EventReport {
            session_id: id.clone(),
            event_type: EventType::Start,
            signature: ticket.signature,
            timestamp: ticket.timestamp,
        };
        assert!(h.processor.report_event_at(&report, NOW + 6).await.is_ok());

        let err = h
            .processor
            .ticket_at(&id, &"0".repeat(64), NOW + 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
    }

    #[tokio::test]
    async fn purge_uses_configured_ttl() {
        let h = Harness::new();
        h.issue("s1").await;

        assert_eq!(h.processor.purge_expired_at(NOW + 86_400).await.unwrap(), 0);
        assert_eq!(h.processor.purge_expired_at(NOW + 86_401).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn issuance_check_does_not_cover_callback_url() {
        let mut h = Harness::new();
        let signature = h
            .signer
            .sign_issuance(&"u1".into(), &"demo_block".into(), &"s1".into(), NOW)
            .unwrap();
        let id = SessionId::from("s1");
        h.store
            .insert(SessionRecord {
                session_id: id.clone(),
                user_id: "u1".into(),
                placement_id: "demo_block".into(),
                callback_url: "https://rewritten.example.com/cb".parse().unwrap(),
                issued_at: NOW,
                signature,
                state: SessionState::Issued,
                version: 0,
                updated_at: NOW,
            })
            .await
            .unwrap();

        h.start(&id).await;
        h.processor
            .report_event_at(&h.report(&id, EventType::Complete, NOW), NOW)
            .await
            .unwrap();

        // The store is trusted for the callback binding.
        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.callback_url.as_str(), "https://rewritten.example.com/cb");
    }

    #[tokio::test]
    async fn full_queue_does_not_block_completion() {
        let mut h = Harness::with_capacity(1);
        let id = h.issue("s1").await;
        h.start(&id).await;
        let backlog =
            PostbackJob::completed("older".into(), "https://owner.example.com/cb".parse().unwrap());
        h.processor.postbacks.enqueue(backlog).unwrap();

        let complete = h.report(&id, EventType::Complete, NOW);
        let ack = tokio::time::timeout(
            Duration::from_millis(50),
            h.processor.report_event_at(&complete, NOW),
        )
        .await
        .expect("report must not wait on a full queue")
        .unwrap();

        assert!(ack.postback_enqueued);
        assert_eq!(h.jobs.try_recv().unwrap().session_id, SessionId::from("older"));
        assert_eq!(h.jobs.try_recv().unwrap().session_id, id);
    }

    #[tokio::test]
    async fn completion_after_dispatcher_stopped_is_not_enqueued() {
        let mut h = Harness::new();
        let id = h.issue("s1").await;
        h.start(&id).await;
        h.jobs.close();

        let ack = h
            .processor
            .report_event_at(&h.report(&id, EventType::Complete, NOW), NOW)
            .await
            .unwrap();

        assert_eq!(ack.state, SessionState::Completed);
        assert!(!ack.postback_enqueued);
    }
}
