pub(crate) mod counter;
pub(crate) mod health;
pub(crate) mod interact;
pub(crate) mod metrics;
pub(crate) mod recommend;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route(
            "/v1/recommendations/collaborative/{user_id}",
            get(recommend::collaborative),
        )
        .route(
            "/v1/recommendations/content/{user_id}",
            get(recommend::content),
        )
        .route(
            "/v1/recommendations/profile/{user_id}",
            get(recommend::profile),
        )
        .route(
            "/v1/recommendations/continue-reading/{user_id}",
            get(recommend::continue_reading),
        )
        .route(
            "/v1/recommendations/author/{user_id}",
            get(recommend::author_based),
        )
        .route("/v1/recommendations/popular", get(recommend::popular))
        .route("/v1/interactions", post(interact::record))
        .route(
            "/v1/interactions/{user_id}/{book_name}",
            delete(interact::remove),
        )
        .route("/v1/counter/status", get(counter::status))
        .route("/v1/counter/history", get(counter::history))
        .route("/v1/train/content", post(recommend::train_content))
        .with_state(state)
}
