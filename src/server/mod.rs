//! Axum HTTP surface for the ad session protocol.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use reward_sessions::server::reward_routes;
//!
//! // 1. Build the service from config, catalog, store and a postback queue
//! let service = RewardService::new(&config, catalog, store, queue)?;
//!
//! // 2. Mount the routes
//! let app = axum::Router::new().merge(reward_routes(service));
//! ```
//!
//! | Route                | Success              | Errors                    |
//! |----------------------|----------------------|---------------------------|
//! | `POST /ads/request`  | `{ad, session}`      | 404                       |
//! | `POST /ads/event`    | `{"status":"ok"}`    | 401, 409, 410             |
//! | `POST /ads/ticket`   | `{session_id, ...}`  | 401, 410                  |
//! | `GET /health`        | `ok`                 |                           |
//!
//! Unparseable bodies get `400`/`415`/`422` with `"error": "InvalidRequest"`.

mod error;
mod extractor;
mod routes;
mod state;
mod types;

pub use error::ApiError;
pub use extractor::ApiJson;
pub use routes::reward_routes;
pub use types::{
    AdRequest, AdResponse, EventRequest, SessionView, StatusResponse, TicketRequest, UserContext,
};
