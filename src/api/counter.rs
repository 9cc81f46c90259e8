use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<usize>,
}

pub(crate) async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.trigger().state().await {
        Ok(counter) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "current_count": counter.current_count,
                "threshold": counter.threshold,
                "total_retrainings": counter.total_retrainings,
                "last_updated": counter.last_updated,
                "last_reset": counter.last_reset,
                "training_in_progress": state.trigger().is_training(),
            })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to read counter state");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "counter state unavailable"})),
            )
                .into_response()
        }
    }
}

pub(crate) async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    match state.trigger().training_history(limit).await {
        Ok(records) => (StatusCode::OK, Json(serde_json::json!(records))).into_response(),
        Err(err) => {
            error!(error = %err, "failed to read training history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "training history unavailable"})),
            )
                .into_response()
        }
    }
}
