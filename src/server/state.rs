use std::sync::Arc;

use crate::service::RewardService;

/// Shared state for route handlers.
pub(super) struct AppState<C, S> {
    pub(super) service: Arc<RewardService<C, S>>,
}

// Manual Clone: avoid derive adding `C: Clone, S: Clone` bounds.
impl<C, S> Clone for AppState<C, S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}
