use axum::Json;
use axum::extract::{FromRequest, Request};
use axum::extract::rejection::JsonRejection;

use super::error::ApiError;

/// JSON body extractor whose rejections use the API error body.
///
/// Malformed JSON, a wrong content type, or an unknown `event_type` become
/// `{"error": "InvalidRequest", "message": ...}` with axum's status code.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
