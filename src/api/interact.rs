use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;
use crate::store::models::Action;

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionRequest {
    user_id: Uuid,
    book_name: String,
    action: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub(crate) async fn record(
    State(state): State<AppState>,
    Json(payload): Json<InteractionRequest>,
) -> impl IntoResponse {
    let action: Action = match payload.action.parse() {
        Ok(action) => action,
        Err(_) => {
            let body = Json(ErrorResponse {
                error: "action must be \"like\" or \"dislike\"".into(),
            });
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
    };

    match state
        .interaction_service()
        .record(payload.user_id, &payload.book_name, action)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "recorded"})),
        )
            .into_response(),
        Err(err) => {
            warn!(user_id = %payload.user_id, book = %payload.book_name, error = %err, "interaction rejected");
            let body = Json(ErrorResponse {
                error: format!("{err:#}"),
            });
            (StatusCode::UNPROCESSABLE_ENTITY, body).into_response()
        }
    }
}

pub(crate) async fn remove(
    State(state): State<AppState>,
    Path((user_id, book_name)): Path<(Uuid, String)>,
) -> impl IntoResponse {
    match state.interaction_service().remove(user_id, &book_name).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(serde_json::json!({"removed": removed})),
        )
            .into_response(),
        Err(err) => {
            warn!(user_id = %user_id, book = %book_name, error = %err, "interaction removal failed");
            let body = Json(ErrorResponse {
                error: format!("{err:#}"),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}
