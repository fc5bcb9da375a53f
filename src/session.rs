use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Creative;
use crate::config::RewardConfig;
use crate::error::Error;
use crate::signer::Signer;
use crate::store::SessionRecord;
use crate::traits::{Catalog, SessionStore};
use crate::types::{PlacementId, SessionId, SessionState, UserId, unix_now};

/// Ad payload handed to the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    pub placement_id: PlacementId,
    pub creative: Creative,
}

/// Client-facing proof of issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub session_id: SessionId,
    pub signature: String,
    pub issued_at: i64,
}

/// Mints signed sessions for catalog placements.
pub struct SessionIssuer<C, S> {
    signer: Signer,
    catalog: Arc<C>,
    store: Arc<S>,
}

impl<C, S> Clone for SessionIssuer<C, S> {
    fn clone(&self) -> Self {
        Self {
            signer: self.signer.clone(),
            catalog: self.catalog.clone(),
            store: self.store.clone(),
        }
    }
}

impl<C: Catalog, S: SessionStore> SessionIssuer<C, S> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the signing key is unusable.
    pub fn new(config: &RewardConfig, catalog: Arc<C>, store: Arc<S>) -> Result<Self, Error> {
        Ok(Self {
            signer: Signer::new(&config.signing_key)?,
            catalog,
            store,
        })
    }

    /// Issue a session for `placement_id` at the current time.
    ///
    /// # Errors
    ///
    /// See [`issue_at`](Self::issue_at).
    pub async fn issue(
        &self,
        placement_id: &PlacementId,
        user_id: &UserId,
    ) -> Result<(Ad, SessionToken), Error> {
        self.issue_at(placement_id, user_id, unix_now()).await
    }

    /// Issue a session with an explicit issuance time.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidField`] if an id is empty or contains the payload separator
    /// - [`Error::PlacementNotFound`] if the catalog has no such placement
    /// - [`Error::NoCreatives`] if the placement has nothing to show
    /// - [`Error::Catalog`] / [`Error::Store`] on collaborator failure
    pub async fn issue_at(
        &self,
        placement_id: &PlacementId,
        user_id: &UserId,
        issued_at: i64,
    ) -> Result<(Ad, SessionToken), Error> {
        let session_id = SessionId::generate();
        // Validate inputs before any I/O.
        let signature = self
            .signer
            .sign_issuance(user_id, placement_id, &session_id, issued_at)?;

        let placement = self
            .catalog
            .lookup(placement_id)
            .await
            .map_err(|e| Error::Catalog(e.to_string()))?
            .ok_or_else(|| Error::PlacementNotFound(placement_id.clone()))?;

        let creative = placement
            .pick_creative()
            .cloned()
            .ok_or_else(|| Error::NoCreatives(placement_id.clone()))?;

        let record = SessionRecord {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            placement_id: placement_id.clone(),
            callback_url: placement.callback_url,
            issued_at,
            signature: signature.clone(),
            state: SessionState::Issued,
            version: 0,
            updated_at: issued_at,
        };
        self.store
            .insert(record)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        tracing::info!(
            session_id = %session_id,
            placement_id = %placement_id,
            user_id = %user_id,
            creative_id = %creative.id,
            "Ad session issued"
        );

        Ok((
            Ad {
                placement_id: placement_id.clone(),
                creative,
            },
            SessionToken {
                session_id,
                signature,
                issued_at,
            },
        ))
    }
}
