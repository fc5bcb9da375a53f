//! HMAC-SHA-256 message authentication for session and event payloads.
//!
//! Two independent MACs are produced with the same process secret:
//!
//! - the **issuance signature** over `(user_id, placement_id, session_id, issued_at)`,
//!   binding a session to the request that minted it;
//! - the **event signature** over `(session_id, timestamp)`, authenticating a
//!   single lifecycle report.
//!
//! Tags travel as lowercase hex. Verification compares in constant time.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::types::{PlacementId, SessionId, UserId};

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted signing key, in bytes.
pub const MIN_KEY_LEN: usize = 32;

/// ASCII unit separator; cannot appear inside any canonical field.
pub const FIELD_SEPARATOR: u8 = 0x1F;

/// Process-wide signing secret.
///
/// `Debug` is redacted so the key never reaches logs.
#[derive(Clone)]
pub struct SigningKey(Arc<[u8]>);

impl SigningKey {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is shorter than [`MIN_KEY_LEN`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LEN {
            return Err(Error::Config(format!(
                "signing key must be at least {MIN_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.into()))
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the hex is invalid or the key is too short.
    pub fn from_hex(key_hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| Error::Config(format!("signing key is not valid hex: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Random 32-byte key, for tests and ephemeral deployments.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; MIN_KEY_LEN] = rand::rng().random();
        Self(Arc::from(&random_bytes[..]))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Stateless MAC primitive keyed with the process secret.
///
/// Holds a pre-keyed HMAC state that is cloned per call, so `Signer` is cheap
/// to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HMAC cannot be keyed.
    pub fn new(key: &SigningKey) -> Result<Self, Error> {
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| Error::Config(format!("signing key rejected: {e}")))?;
        Ok(Self { mac })
    }

    /// Raw 32-byte tag over `payload`.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> [u8; 32] {
        let mut mac = self.mac.clone();
        mac.update(payload);
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    /// Constant-time check of a raw tag.
    #[must_use]
    pub fn verify(&self, payload: &[u8], tag: &[u8]) -> bool {
        let expected = self.sign(payload);
        if expected.len() != tag.len() {
            return false;
        }
        expected.ct_eq(tag).into()
    }

    #[must_use]
    pub fn sign_hex(&self, payload: &[u8]) -> String {
        hex::encode(self.sign(payload))
    }

    /// Constant-time check of a hex tag.
    ///
    /// Compares the canonical lowercase rendering byte for byte, so any
    /// altered character (including case) fails.
    #[must_use]
    pub fn verify_hex(&self, payload: &[u8], tag_hex: &str) -> bool {
        let expected = self.sign_hex(payload);
        if expected.len() != tag_hex.len() {
            return false;
        }
        expected.as_bytes().ct_eq(tag_hex.as_bytes()).into()
    }

    /// Issuance signature binding a session to its user and placement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] if a field contains the separator or is empty.
    pub fn sign_issuance(
        &self,
        user_id: &UserId,
        placement_id: &PlacementId,
        session_id: &SessionId,
        issued_at: i64,
    ) -> Result<String, Error> {
        let payload = issuance_payload(user_id, placement_id, session_id, issued_at)?;
        Ok(self.sign_hex(&payload))
    }

    /// Event signature over `(session_id, timestamp)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] if the session id is not encodable.
    pub fn sign_event(&self, session_id: &SessionId, timestamp: i64) -> Result<String, Error> {
        let payload = event_payload(session_id, timestamp)?;
        Ok(self.sign_hex(&payload))
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] if the session id is not encodable.
    pub fn verify_event(
        &self,
        session_id: &SessionId,
        timestamp: i64,
        signature: &str,
    ) -> Result<bool, Error> {
        let payload = event_payload(session_id, timestamp)?;
        Ok(self.verify_hex(&payload, signature))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// Canonical issuance payload: `user_id ␟ placement_id ␟ session_id ␟ issued_at`.
///
/// # Errors
///
/// Returns [`Error::InvalidField`] if a field contains [`FIELD_SEPARATOR`] or is empty.
pub fn issuance_payload(
    user_id: &UserId,
    placement_id: &PlacementId,
    session_id: &SessionId,
    issued_at: i64,
) -> Result<Vec<u8>, Error> {
    canonical(&[
        ("user_id", user_id.as_str()),
        ("placement_id", placement_id.as_str()),
        ("session_id", session_id.as_str()),
        ("issued_at", &issued_at.to_string()),
    ])
}

/// Canonical event payload: `session_id ␟ timestamp`.
///
/// # Errors
///
/// Returns [`Error::InvalidField`] if the session id contains [`FIELD_SEPARATOR`] or is empty.
pub fn event_payload(session_id: &SessionId, timestamp: i64) -> Result<Vec<u8>, Error> {
    canonical(&[
        ("session_id", session_id.as_str()),
        ("timestamp", &timestamp.to_string()),
    ])
}

fn canonical(fields: &[(&'static str, &str)]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(fields.iter().map(|(_, v)| v.len() + 1).sum());
    for (i, &(name, value)) in fields.iter().enumerate() {
        if value.is_empty() {
            return Err(Error::InvalidField {
                field: name,
                reason: "must not be empty".into(),
            });
        }
        if value.as_bytes().contains(&FIELD_SEPARATOR) {
            return Err(Error::InvalidField {
                field: name,
                reason: "contains a reserved separator character".into(),
            });
        }
        if i > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}
