use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::error::ApiError;
use super::extractor::ApiJson;
use super::state::AppState;
use super::types::{AdRequest, AdResponse, EventRequest, StatusResponse, TicketRequest};
use crate::events::EventReport;
use crate::service::RewardService;
use crate::traits::{Catalog, SessionStore};
use crate::validator::EventTicket;

/// Create the reward protocol router.
pub fn reward_routes<C, S>(service: RewardService<C, S>) -> Router
where
    C: Catalog,
    S: SessionStore,
{
    let state = AppState {
        service: Arc::new(service),
    };

    Router::new()
        .route("/ads/request", post(request_ad::<C, S>))
        .route("/ads/event", post(report_event::<C, S>))
        .route("/ads/ticket", post(event_ticket::<C, S>))
        .route("/health", get(health))
        .with_state(state)
}

// ── Ad request ─────────────────────────────────────────────────────

async fn request_ad<C: Catalog, S: SessionStore>(
    State(state): State<AppState<C, S>>,
    ApiJson(body): ApiJson<AdRequest>,
) -> Result<Json<AdResponse>, ApiError> {
    let (ad, token) = state
        .service
        .request_ad(&body.placement_id, &body.user_context.user_id)
        .await?;

    Ok(Json(AdResponse {
        ad,
        session: token.into(),
    }))
}

// ── Event report ───────────────────────────────────────────────────

async fn report_event<C: Catalog, S: SessionStore>(
    State(state): State<AppState<C, S>>,
    ApiJson(body): ApiJson<EventRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = EventReport {
        session_id: body.session_id,
        event_type: body.event_type,
        signature: body.signature,
        timestamp: body.timestamp,
    };

    state.service.report_event(&report).await?;

    Ok(Json(StatusResponse::ok()))
}

// ── Event ticket ───────────────────────────────────────────────────

async fn event_ticket<C: Catalog, S: SessionStore>(
    State(state): State<AppState<C, S>>,
    ApiJson(body): ApiJson<TicketRequest>,
) -> Result<Json<EventTicket>, ApiError> {
    let ticket = state
        .service
        .event_ticket(&body.session_id, &body.signature)
        .await?;

    Ok(Json(ticket))
}

// ── Health ─────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}
