use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::traits::{BoxError, Catalog};
use crate::types::{CreativeId, PlacementId};

/// A single rewarded-video creative, as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Creative {
    pub id: CreativeId,
    pub video_url: Url,
    pub duration_secs: u32,
}

impl Creative {
    #[must_use]
    pub fn new(id: impl Into<CreativeId>, video_url: Url, duration_secs: u32) -> Self {
        Self {
            id: id.into(),
            video_url,
            duration_secs,
        }
    }
}

/// Catalog entry for an ad slot.
///
/// Not `Serialize`: the callback URL must never leave the server.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Placement {
    pub callback_url: Url,
    pub creatives: Vec<Creative>,
}

impl Placement {
    #[must_use]
    pub fn new(callback_url: Url, creatives: Vec<Creative>) -> Self {
        Self {
            callback_url,
            creatives,
        }
    }

    /// Uniform random pick over the creative set. `None` if the set is empty.
    #[must_use]
    pub fn pick_creative(&self) -> Option<&Creative> {
        if self.creatives.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..self.creatives.len());
        self.creatives.get(idx)
    }
}

/// Fixed, process-local catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    placements: HashMap<PlacementId, Placement>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_placement(
        mut self,
        placement_id: impl Into<PlacementId>,
        placement: Placement,
    ) -> Self {
        self.placements.insert(placement_id.into(), placement);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

impl Catalog for InMemoryCatalog {
    async fn lookup(&self, placement_id: &PlacementId) -> Result<Option<Placement>, BoxError> {
        Ok(self.placements.get(placement_id).cloned())
    }
}
