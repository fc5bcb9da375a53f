//! Reward postback delivery.
//!
//! The event path enqueues a [`PostbackJob`] on a bounded channel and returns
//! immediately. A background [`Dispatcher`] drains the channel and runs one
//! retry schedule per job: exponential backoff with full jitter, capped at
//! [`RetryPolicy::max_attempts`].
//!
//! The receiver dedupes on `session_id`, which is also sent as the
//! `Idempotency-Key` header, so retries never grant a second reward.
//!
//! On [`DispatcherHandle::shutdown`] the queue is closed, buffered jobs are
//! still taken, and every accepted job finishes its schedule before the
//! report is returned.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use crate::error::Error;
use crate::traits::PostbackTransport;
use crate::types::SessionId;

/// Header carrying the receiver-side dedupe key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Completed,
}

/// Body of the outbound callback: `{"status":"completed","session_id":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardNotification {
    pub status: RewardStatus,
    pub session_id: SessionId,
}

/// One pending reward notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostbackJob {
    pub session_id: SessionId,
    pub callback_url: Url,
    pub status: RewardStatus,
}

impl PostbackJob {
    #[must_use]
    pub fn completed(session_id: SessionId, callback_url: Url) -> Self {
        Self {
            session_id,
            callback_url,
            status: RewardStatus::Completed,
        }
    }

    #[must_use]
    pub fn notification(&self) -> RewardNotification {
        RewardNotification {
            status: self.status,
            session_id: self.session_id.clone(),
        }
    }
}

/// Bounded exponential backoff with full jitter.
///
/// The wait after failed attempt `n` (1-based) is drawn uniformly from
/// `0 ..= min(max_delay, base_delay * 2^(n-1))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Upper bound of the wait after failed attempt `attempt`.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered wait after failed attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling_ms = u64::try_from(self.ceiling(attempt).as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }
}

/// Dispatcher tuning carried by [`RewardConfig`](crate::RewardConfig).
#[derive(Debug, Clone)]
pub struct PostbackSettings {
    pub(crate) retry: RetryPolicy,
    pub(crate) request_timeout: Duration,
    pub(crate) queue_capacity: usize,
}

impl Default for PostbackSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            queue_capacity: 1024,
        }
    }
}

impl PostbackSettings {
    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Sending half of the postback channel, held by the event path.
///
/// Jobs go to a bounded channel first. When it is full they spill into an
/// unbounded overflow channel, so enqueueing never waits and a committed
/// completion cannot be lost to a cancelled request.
#[derive(Debug, Clone)]
pub struct PostbackQueue {
    tx: mpsc::Sender<PostbackJob>,
    overflow: mpsc::UnboundedSender<PostbackJob>,
}

impl PostbackQueue {
    /// Bounded channel plus overflow; the receiver goes to [`Dispatcher::run`]
    /// or a custom consumer.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, PostbackReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (overflow, spill) = mpsc::unbounded_channel();
        (Self { tx, overflow }, PostbackReceiver { rx, spill })
    }

    /// Hands `job` to the dispatcher without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PostbackDeliveryFailed`] with zero attempts if the
    /// dispatcher has shut down.
    pub fn enqueue(&self, job: PostbackJob) -> Result<(), Error> {
        let job = match self.tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    session_id = %job.session_id,
                    "Postback queue full, spilling to overflow"
                );
                job
            }
            Err(mpsc::error::TrySendError::Closed(job)) => job,
        };
        self.overflow
            .send(job)
            .map_err(|mpsc::error::SendError(job)| Error::PostbackDeliveryFailed {
                session_id: job.session_id,
                attempts: 0,
                reason: "postback queue is closed".into(),
            })
    }
}

/// Receiving half of a [`PostbackQueue`].
#[derive(Debug)]
pub struct PostbackReceiver {
    rx: mpsc::Receiver<PostbackJob>,
    spill: mpsc::UnboundedReceiver<PostbackJob>,
}

impl PostbackReceiver {
    /// Next job from either channel. `None` once both are closed and empty.
    pub async fn recv(&mut self) -> Option<PostbackJob> {
        tokio::select! {
            biased;
            Some(job) = self.rx.recv() => Some(job),
            Some(job) = self.spill.recv() => Some(job),
            else => None,
        }
    }

    /// # Errors
    ///
    /// Returns the overflow channel's error when both channels are empty.
    pub fn try_recv(&mut self) -> Result<PostbackJob, mpsc::error::TryRecvError> {
        self.rx.try_recv().or_else(|_| self.spill.try_recv())
    }

    /// Stops intake; buffered jobs can still be received.
    pub fn close(&mut self) {
        self.rx.close();
        self.spill.close();
    }
}

/// Summary returned when the dispatcher stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<SessionId>,
}

/// Runs retry schedules against a [`PostbackTransport`].
pub struct Dispatcher<T> {
    transport: Arc<T>,
    retry: RetryPolicy,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<T: PostbackTransport> Dispatcher<T> {
    #[must_use]
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            retry,
        }
    }

    /// Delivers one job, retrying on failure. Returns the attempt that succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PostbackDeliveryFailed`] once every attempt has failed.
    pub async fn deliver(&self, job: &PostbackJob) -> Result<u32, Error> {
        let notification = job.notification();
        let max_attempts = self.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.send(&job.callback_url, &notification).await {
                Ok(()) => {
                    tracing::info!(
                        session_id = %job.session_id,
                        attempt,
                        "Reward postback delivered"
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        tracing::warn!(
                            session_id = %job.session_id,
                            attempt,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %last_error,
                            "Reward postback attempt failed"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let err = Error::PostbackDeliveryFailed {
            session_id: job.session_id.clone(),
            attempts: max_attempts,
            reason: last_error,
        };
        tracing::error!(session_id = %job.session_id, error = %err, "Reward postback abandoned");
        Err(err)
    }

    /// Drains `rx` until it closes or `shutdown` fires, then waits for every
    /// accepted job's retry schedule to finish. A dropped shutdown sender is
    /// not a shutdown request.
    pub async fn run(
        self,
        mut rx: PostbackReceiver,
        mut shutdown: oneshot::Receiver<()>,
    ) -> DispatchReport {
        let mut in_flight: JoinSet<(SessionId, bool)> = JoinSet::new();
        let mut report = DispatchReport::default();
        let mut handle_dropped = false;

        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => self.spawn_job(&mut in_flight, job),
                    None => break,
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record_outcome(&mut report, done);
                }
                signal = &mut shutdown, if !handle_dropped => match signal {
                    Ok(()) => {
                        tracing::info!("Postback dispatcher shutting down, draining queue");
                        rx.close();
                        while let Some(job) = rx.recv().await {
                            self.spawn_job(&mut in_flight, job);
                        }
                        break;
                    }
                    Err(_) => {
                        // Keep serving until every queue is dropped.
                        tracing::debug!("Dispatcher handle dropped");
                        handle_dropped = true;
                    }
                },
            }
        }

        while let Some(done) = in_flight.join_next().await {
            record_outcome(&mut report, done);
        }

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "Postback dispatcher stopped"
        );
        report
    }

    /// Starts the dispatcher on the current tokio runtime.
    #[must_use]
    pub fn spawn(self, capacity: usize) -> (PostbackQueue, DispatcherHandle) {
        let (queue, rx) = PostbackQueue::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(rx, shutdown_rx));
        (
            queue,
            DispatcherHandle {
                shutdown: Some(shutdown_tx),
                join,
            },
        )
    }

    fn spawn_job(&self, in_flight: &mut JoinSet<(SessionId, bool)>, job: PostbackJob) {
        let dispatcher = self.clone();
        in_flight.spawn(async move {
            let delivered = dispatcher.deliver(&job).await.is_ok();
            (job.session_id, delivered)
        });
    }
}

fn record_outcome(
    report: &mut DispatchReport,
    done: Result<(SessionId, bool), tokio::task::JoinError>,
) {
    match done {
        Ok((_, true)) => report.delivered += 1,
        Ok((session_id, false)) => report.failed.push(session_id),
        Err(e) => tracing::error!(error = %e, "Postback task panicked"),
    }
}

/// Owner handle for a spawned [`Dispatcher`].
///
/// Dropping it detaches the dispatcher, which then runs until every
/// [`PostbackQueue`] is dropped.
#[must_use = "call `shutdown` to drain pending postbacks"]
pub struct DispatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<DispatchReport>,
}

impl DispatcherHandle {
    /// Stops intake and waits for in-flight retry schedules to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the dispatcher task panicked.
    pub async fn shutdown(mut self) -> Result<DispatchReport, Error> {
        if let Some(tx) = self.shutdown.take() {
            // The worker may already have exited because every sender was dropped.
            let _ = tx.send(());
        }
        self.join.await.map_err(|e| Error::Worker(e.to_string()))
    }
}

#[cfg(feature = "http-postback")]
pub use http::HttpTransport;

#[cfg(feature = "http-postback")]
mod http {
    use std::time::Duration;

    use url::Url;

    use super::{IDEMPOTENCY_HEADER, RewardNotification};
    use crate::error::Error;
    use crate::traits::{BoxError, PostbackTransport};

    /// JSON-over-HTTPS transport built on `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        http: reqwest::Client,
    }

    impl HttpTransport {
        /// # Errors
        ///
        /// Returns [`Error::Http`] if the TLS backend cannot be initialised.
        pub fn new(request_timeout: Duration) -> Result<Self, Error> {
            let http = reqwest::Client::builder().timeout(request_timeout).build()?;
            Ok(Self { http })
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        /// Returns the response on 2xx, or an error with status and body.
        async fn ensure_success(response: reqwest::Response) -> Result<(), Error> {
            if response.status().is_success() {
                return Ok(());
            }
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            Err(Error::Callback { status, detail })
        }
    }

    impl PostbackTransport for HttpTransport {
        async fn send(
            &self,
            callback_url: &Url,
            notification: &RewardNotification,
        ) -> Result<(), BoxError> {
            let response = self
                .http
                .post(callback_url.clone())
                .header(IDEMPOTENCY_HEADER, notification.session_id.as_str())
                .json(notification)
                .send()
                .await
                .map_err(Error::from)?;
            Self::ensure_success(response).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::traits::BoxError;

    /// Fails the first `fail_first` attempts, then records deliveries.
    #[derive(Default)]
    struct FlakyTransport {
        fail_first: u32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<(Url, RewardNotification)>>,
    }

    impl FlakyTransport {
        fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }
    }

    impl PostbackTransport for FlakyTransport {
        async fn send(
            &self,
            callback_url: &Url,
            notification: &RewardNotification,
        ) -> Result<(), BoxError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err(format!("connection refused (attempt {attempt})").into());
            }
            self.delivered
                .lock()
                .unwrap()
                .push((callback_url.clone(), notification.clone()));
            Ok(())
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    fn job(id: &str) -> PostbackJob {
        PostbackJob::completed(id.into(), "https://owner.example.com/cb".parse().unwrap())
    }

    #[test]
    fn notification_wire_format() {
        let json = serde_json::to_value(job("s1").notification()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "completed", "session_id": "s1"})
        );
    }

    #[test]
    fn ceiling_doubles_until_cap() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.ceiling(2), Duration::from_secs(2));
        assert_eq!(policy.ceiling(3), Duration::from_secs(4));
        assert_eq!(policy.ceiling(4), Duration::from_secs(8));
        assert_eq!(policy.ceiling(5), Duration::from_secs(10));
        assert_eq!(policy.ceiling(200), Duration::from_secs(10));
    }

    #[test]
    fn jittered_delay_stays_under_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            for _ in 0..50 {
                assert!(policy.delay_for(attempt) <= policy.ceiling(attempt));
            }
        }
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        assert_eq!(no_wait(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn deliver_retries_until_success() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(2), no_wait(5));

        let attempt = dispatcher.deliver(&job("s1")).await.unwrap();

        assert_eq!(attempt, 3);
        assert_eq!(dispatcher.transport.attempts.load(Ordering::SeqCst), 3);
        let delivered = dispatcher.transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.session_id, SessionId::from("s1"));
    }

    #[tokio::test]
    async fn deliver_gives_up_after_max_attempts() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(u32::MAX), no_wait(5));

        let err = dispatcher.deliver(&job("s1")).await.unwrap_err();

        assert!(matches!(
            err,
            Error::PostbackDeliveryFailed { attempts: 5, .. }
        ));
        assert_eq!(dispatcher.transport.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_backs_off_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60));
        let dispatcher = Dispatcher::new(FlakyTransport::failing(u32::MAX), policy);

        let started = tokio::time::Instant::now();
        dispatcher.deliver(&job("s1")).await.unwrap_err();

        // Two waits with ceilings 1s and 2s.
        assert!(started.elapsed() <= Duration::from_secs(3));
        assert_eq!(dispatcher.transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_drains_accepted_jobs() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(1), no_wait(3));
        let transport = dispatcher.transport.clone();
        let (queue, handle) = dispatcher.spawn(8);

        queue.enqueue(job("s1")).unwrap();
        queue.enqueue(job("s2")).unwrap();
        let report = handle.shutdown().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        assert_eq!(transport.delivered.lock().unwrap().len(), 2);
        assert!(queue.enqueue(job("s3")).is_err());
    }

    #[tokio::test]
    async fn exhausted_jobs_are_reported() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(u32::MAX), no_wait(2));
        let (queue, handle) = dispatcher.spawn(8);

        queue.enqueue(job("s1")).unwrap();
        let report = handle.shutdown().await.unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec![SessionId::from("s1")]);
    }

    #[tokio::test]
    async fn dispatcher_stops_when_all_queues_dropped() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(0), no_wait(1));
        let (queue, handle) = dispatcher.spawn(8);

        queue.enqueue(job("s1")).unwrap();
        drop(queue);
        let report = handle.shutdown().await.unwrap();

        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn full_queue_spills_instead_of_waiting() {
        let (queue, mut rx) = PostbackQueue::channel(1);

        queue.enqueue(job("s1")).unwrap();
        queue.enqueue(job("s2")).unwrap();
        queue.enqueue(job("s3")).unwrap();

        let mut seen = Vec::new();
        while let Ok(job) = rx.try_recv() {
            seen.push(job.session_id);
        }
        let expected: Vec<SessionId> = vec!["s1".into(), "s2".into(), "s3".into()];
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn closed_queue_rejects_jobs() {
        let (queue, mut rx) = PostbackQueue::channel(1);
        rx.close();

        let err = queue.enqueue(job("s1")).unwrap_err();
        assert!(matches!(
            err,
            Error::PostbackDeliveryFailed { attempts: 0, .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_overflow() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(0), no_wait(1));
        let transport = dispatcher.transport.clone();
        let (queue, handle) = dispatcher.spawn(1);

        for id in ["s1", "s2", "s3", "s4"] {
            queue.enqueue(job(id)).unwrap();
        }
        let report = handle.shutdown().await.unwrap();

        assert_eq!(report.delivered, 4);
        assert_eq!(transport.delivered.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn dropped_handle_keeps_dispatcher_running() {
        let dispatcher = Dispatcher::new(FlakyTransport::failing(0), no_wait(1));
        let transport = dispatcher.transport.clone();
        let (queue, handle) = dispatcher.spawn(8);
        drop(handle);
        tokio::task::yield_now().await;

        queue.enqueue(job("s1")).unwrap();

        for _ in 0..100 {
            if !transport.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }
}
