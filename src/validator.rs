use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::error::Error;
use crate::signer::{Signer, issuance_payload};
use crate::store::SessionRecord;
use crate::types::SessionId;

/// Freshly minted event credentials for a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTicket {
    pub session_id: SessionId,
    pub timestamp: i64,
    pub signature: String,
}

/// Stateless checks applied to every inbound report.
///
/// None of these methods touch the session store; callers load the record
/// and pass it in, so a failed check can never mutate anything.
#[derive(Debug, Clone)]
pub struct SessionValidator {
    signer: Signer,
    event_skew_secs: i64,
    session_ttl_secs: i64,
}

impl SessionValidator {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the signing key is unusable.
    pub fn new(config: &RewardConfig) -> Result<Self, Error> {
        Ok(Self {
            signer: Signer::new(&config.signing_key)?,
            event_skew_secs: config.event_skew_secs,
            session_ttl_secs: config.session_ttl_secs,
        })
    }

    /// Event MAC over `(session_id, timestamp)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] on mismatch, including when the
    /// session id cannot be encoded at all.
    pub fn check_event_signature(
        &self,
        session_id: &SessionId,
        timestamp: i64,
        signature: &str,
    ) -> Result<(), Error> {
        match self.signer.verify_event(session_id, timestamp, signature) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(Error::InvalidSignature),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::StaleEvent`] if `timestamp` is more than the skew window
    /// away from `now`, in either direction.
    pub fn check_freshness(&self, timestamp: i64, now: i64) -> Result<(), Error> {
        if timestamp.abs_diff(now) > self.event_skew_secs.unsigned_abs() {
            return Err(Error::StaleEvent {
                timestamp,
                now,
                skew_secs: self.event_skew_secs,
            });
        }
        Ok(())
    }

    /// Resolves a store lookup into a live session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if the session is unknown or past its TTL.
    pub fn check_live(
        &self,
        session_id: &SessionId,
        record: Option<SessionRecord>,
        now: i64,
    ) -> Result<SessionRecord, Error> {
        match record {
            Some(record) if !record.is_expired(now, self.session_ttl_secs) => Ok(record),
            _ => Err(Error::SessionExpired(session_id.clone())),
        }
    }

    /// Recomputes the issuance MAC from the record's fixed fields and compares
    /// it with the signature stored at issuance.
    ///
    /// The MAC covers `user_id`, `placement_id`, `session_id` and `issued_at`
    /// only. `callback_url` is not signed, so the store must be trusted for
    /// the callback binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the record was altered after issuance.
    pub fn verify_issuance(&self, record: &SessionRecord) -> Result<(), Error> {
        let payload = issuance_payload(
            &record.user_id,
            &record.placement_id,
            &record.session_id,
            record.issued_at,
        )
        .map_err(|_| Error::InvalidSignature)?;
        if self.signer.verify_hex(&payload, &record.signature) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }

    /// Constant-time check that a client-presented issuance signature is the
    /// one stored for the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] on mismatch.
    pub fn verify_token(&self, record: &SessionRecord, presented: &str) -> Result<(), Error> {
        use subtle::ConstantTimeEq;

        let stored = record.signature.as_bytes();
        let presented = presented.as_bytes();
        if stored.len() == presented.len() && bool::from(stored.ct_eq(presented)) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }

    /// Signs `(session_id, now)` for a caller that proved token possession.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] if the session id cannot be encoded.
    pub fn mint_ticket(&self, session_id: &SessionId, now: i64) -> Result<EventTicket, Error> {
        Ok(EventTicket {
            session_id: session_id.clone(),
            timestamp: now,
            signature: self.signer.sign_event(session_id, now)?,
        })
    }

    #[must_use]
    pub fn session_ttl_secs(&self) -> i64 {
        self.session_ttl_secs
    }

    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}
