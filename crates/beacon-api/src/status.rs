use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, error};

use beacon_types::api::{BadgeResponse, RefreshResponse};

use crate::AppState;

/// Badge for the current status. Always 200: a store failure degrades to
/// the default offline badge.
pub async fn get_badge(State(state): State<AppState>) -> Json<BadgeResponse> {
    let record = state.store.get().await;
    debug!("Current status: {}", record.message());
    Json(BadgeResponse::from(&record))
}

/// Stored record for operators. Unlike the badge, this reports store
/// failures.
pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.try_get().await {
        Ok(record) => (StatusCode::OK, Json(RefreshResponse::Success { record })),
        Err(e) => {
            error!("Failed to read status record: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RefreshResponse::Error {
                    message: e.to_string(),
                }),
            )
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}
