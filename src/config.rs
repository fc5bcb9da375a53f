use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::postback::{PostbackSettings, RetryPolicy};
use crate::signer::SigningKey;

/// Protocol configuration, built once at startup and passed into constructors.
///
/// The signing key is a constructor parameter, so there is no runtime
/// "missing key" path. Use [`from_env()`](RewardConfig::from_env) for
/// convention-based setup, or [`new()`](RewardConfig::new) with `with_*`
/// methods for full control.
#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub(crate) signing_key: SigningKey,
    pub(crate) event_skew_secs: i64,
    pub(crate) session_ttl_secs: i64,
    pub(crate) postback: PostbackSettings,
}

impl RewardConfig {
    pub const DEFAULT_EVENT_SKEW_SECS: i64 = 5 * 60;
    pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            event_skew_secs: Self::DEFAULT_EVENT_SKEW_SECS,
            session_ttl_secs: Self::DEFAULT_SESSION_TTL_SECS,
            postback: PostbackSettings::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `REWARD_SIGNING_KEY`: hex-encoded HMAC key, at least 32 bytes
    ///
    /// # Optional env vars
    /// - `REWARD_EVENT_SKEW_SECS`: accepted clock skew for event timestamps (default 300)
    /// - `REWARD_SESSION_TTL_SECS`: session lifetime (default 86400)
    /// - `REWARD_POSTBACK_MAX_ATTEMPTS`: delivery attempts per postback (default 5)
    /// - `REWARD_POSTBACK_BASE_DELAY_MS`: first backoff ceiling (default 1000)
    /// - `REWARD_POSTBACK_MAX_DELAY_MS`: backoff ceiling cap (default 60000)
    /// - `REWARD_POSTBACK_TIMEOUT_SECS`: per-attempt HTTP timeout (default 10)
    /// - `REWARD_POSTBACK_QUEUE_CAPACITY`: pending postback jobs (default 1024)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is missing or any value fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        let key_hex = std::env::var("REWARD_SIGNING_KEY")
            .map_err(|_| Error::Config("REWARD_SIGNING_KEY is required".into()))?;
        let mut config = Self::new(SigningKey::from_hex(&key_hex)?);

        if let Some(secs) = env_parse::<i64>("REWARD_EVENT_SKEW_SECS")? {
            config = config.with_event_skew_secs(secs);
        }
        if let Some(secs) = env_parse::<i64>("REWARD_SESSION_TTL_SECS")? {
            config = config.with_session_ttl_secs(secs);
        }

        let defaults = RetryPolicy::default();
        let max_attempts =
            env_parse::<u32>("REWARD_POSTBACK_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts());
        let base_delay = env_parse::<u64>("REWARD_POSTBACK_BASE_DELAY_MS")?
            .map_or(defaults.base_delay(), Duration::from_millis);
        let max_delay = env_parse::<u64>("REWARD_POSTBACK_MAX_DELAY_MS")?
            .map_or(defaults.max_delay(), Duration::from_millis);
        config = config.with_retry_policy(RetryPolicy::new(max_attempts, base_delay, max_delay));

        if let Some(secs) = env_parse::<u64>("REWARD_POSTBACK_TIMEOUT_SECS")? {
            config = config.with_postback_timeout(Duration::from_secs(secs));
        }
        if let Some(capacity) = env_parse::<usize>("REWARD_POSTBACK_QUEUE_CAPACITY")? {
            config = config.with_postback_queue_capacity(capacity);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), Error> {
        if self.event_skew_secs <= 0 {
            return Err(Error::Config("event skew must be positive".into()));
        }
        if self.session_ttl_secs <= 0 {
            return Err(Error::Config("session TTL must be positive".into()));
        }
        if self.postback.queue_capacity == 0 {
            return Err(Error::Config("postback queue capacity must be non-zero".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_event_skew_secs(mut self, secs: i64) -> Self {
        self.event_skew_secs = secs;
        self
    }

    #[must_use]
    pub fn with_session_ttl_secs(mut self, secs: i64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.postback.retry = retry;
        self
    }

    #[must_use]
    pub fn with_postback_timeout(mut self, timeout: Duration) -> Self {
        self.postback.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_postback_queue_capacity(mut self, capacity: usize) -> Self {
        self.postback.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn event_skew_secs(&self) -> i64 {
        self.event_skew_secs
    }

    #[must_use]
    pub fn session_ttl_secs(&self) -> i64 {
        self.session_ttl_secs
    }

    #[must_use]
    pub fn postback(&self) -> &PostbackSettings {
        &self.postback
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
