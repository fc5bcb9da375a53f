use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::Error;

/// HTTP rendering of protocol errors.
///
/// Client-caused kinds map to their documented status codes. Everything else
/// is logged and collapsed into an opaque `500`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Protocol(#[from] Error),

    /// Body could not be parsed into the request type.
    #[error("{message}")]
    InvalidRequest { status: StatusCode, message: String },
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    /// Status code and stable error name for the wrapped error.
    #[must_use]
    pub fn classify(&self) -> (StatusCode, &'static str) {
        let err = match self {
            Self::Protocol(err) => err,
            Self::InvalidRequest { status, .. } => return (*status, "InvalidRequest"),
        };
        match err {
            Error::PlacementNotFound(_) => (StatusCode::NOT_FOUND, "PlacementNotFound"),
            Error::NoCreatives(_) => (StatusCode::NOT_FOUND, "NoCreatives"),
            Error::InvalidField { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "InvalidField"),
            Error::InvalidSignature => (StatusCode::UNAUTHORIZED, "InvalidSignature"),
            Error::IllegalTransition { .. } => (StatusCode::CONFLICT, "IllegalTransition"),
            Error::StaleEvent { .. } => (StatusCode::GONE, "StaleEvent"),
            Error::SessionExpired(_) => (StatusCode::GONE, "SessionExpired"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, name) = self.classify();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Reward API internal error");
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody { error: name, message })).into_response()
    }
}
