mod consume;
mod notice;
mod verify;

pub use consume::*;
pub use notice::*;
pub use verify::*;

use axum::{
    Json, Router,
    body::Bytes,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::protocol::CardRequest;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Card fields from a JSON body. An empty body contributes nothing, leaving
/// the query string as the only source; a body that is not a JSON object is
/// refused.
fn body_fields(body: &Bytes) -> Result<CardRequest> {
    if body.trim_ascii().is_empty() {
        return Ok(CardRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Rejected malformed request body: {}", e);
        AppError::BadRequest("Malformed JSON request body".into())
    })
}

/// Routes under `/api`, all behind the envelope.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/redeem", post(verify_card))
        .route("/redeem/consume", post(consume_card))
        .route("/notice", get(get_notice))
}
