use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::cache::{cache_key, prefix};
use crate::engine::RecommendationResponse;
use crate::engine::language::meets_language_requirement;
use crate::store::traits::{CatalogStore, InteractionStore};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub(crate) struct RecommendQuery {
    limit: Option<usize>,
    #[serde(default)]
    alternative: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PopularQuery {
    limit: Option<usize>,
    user_id: Option<Uuid>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn record_served(state: &AppState, response: &RecommendationResponse) {
    let metrics = state.telemetry().metrics();
    metrics.recommendations_served.inc();
    if response.count == 0 {
        metrics.recommendations_empty.inc();
    }
}

pub(crate) async fn collaborative(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Json<RecommendationResponse> {
    let timer = state
        .telemetry()
        .metrics()
        .collaborative_query_duration
        .start_timer();
    let response = state
        .collaborative_engine()
        .recommend(user_id, clamp_limit(query.limit))
        .await;
    timer.observe_duration();
    record_served(&state, &response);
    Json(response)
}

pub(crate) async fn content(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Json<RecommendationResponse> {
    let timer = state
        .telemetry()
        .metrics()
        .content_query_duration
        .start_timer();
    let response = state
        .content_engine()
        .similar_for_user(user_id, clamp_limit(query.limit), query.alternative)
        .await;
    timer.observe_duration();
    record_served(&state, &response);
    Json(response)
}

pub(crate) async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Json<RecommendationResponse> {
    let response = state
        .content_engine()
        .profile_for_user(user_id, clamp_limit(query.limit))
        .await;
    record_served(&state, &response);
    Json(response)
}

pub(crate) async fn continue_reading(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Json<RecommendationResponse> {
    let response = state
        .continue_reading()
        .recommend(user_id, clamp_limit(query.limit))
        .await;
    record_served(&state, &response);
    Json(response)
}

/// Best unseen books by the user's most-preferred author.
pub(crate) async fn author_based(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Json<RecommendationResponse> {
    let limit = clamp_limit(query.limit);
    let scope = format!("{}:user:{user_id}", prefix::AUTHOR_BASED);
    let key = cache_key(&scope, &[("limit", &limit.to_string())]);
    if let Ok(Some(cached)) = state.cache().get(&key).await {
        if let Ok(response) = serde_json::from_value::<RecommendationResponse>(cached) {
            record_served(&state, &response);
            return Json(response);
        }
    }

    let response = match author_based_inner(&state, user_id, limit).await {
        Ok(response) => response,
        Err(err) => {
            warn!(user_id = %user_id, error = %err, "author-based recommendation failed");
            RecommendationResponse::empty("Author-based recommendations are not available")
        }
    };

    if !response.recommendations.is_empty() {
        if let Ok(value) = serde_json::to_value(&response) {
            let ttl = state.config().recommendations_ttl();
            let _ = state.cache().set(&key, value, Some(ttl)).await;
        }
    }
    record_served(&state, &response);
    Json(response)
}

async fn author_based_inner(
    state: &AppState,
    user_id: Uuid,
    limit: usize,
) -> anyhow::Result<RecommendationResponse> {
    let Some(top) = state.affinity().top(user_id).await? else {
        return Ok(RecommendationResponse::empty(
            "Like some books to build an author preference",
        ));
    };

    let store = state.store();
    let seen = store.interacted_book_names(user_id).await?;
    let books = store
        .books_by_author(&top.author_name, limit + seen.len())
        .await?;

    let recommendations: Vec<serde_json::Value> = books
        .iter()
        .filter(|book| !seen.contains(&book.name))
        .take(limit)
        .map(|book| {
            let mut value = book.to_summary_json();
            if let Some(object) = value.as_object_mut() {
                object.insert("algorithm".into(), serde_json::json!("author_based"));
                object.insert(
                    "based_on_author".into(),
                    serde_json::json!(top.author_name),
                );
            }
            value
        })
        .collect();

    if recommendations.is_empty() {
        return Ok(RecommendationResponse::empty(format!(
            "No unread books left from {}",
            top.author_name
        )));
    }
    let explanation = format!("More from {}, your most liked author", top.author_name);
    Ok(RecommendationResponse::new(recommendations, explanation))
}

/// Most popular catalog books, optionally filtered to a user's languages
/// and excluding their history.
pub(crate) async fn popular(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> Json<RecommendationResponse> {
    let limit = clamp_limit(query.limit);
    let scope = match query.user_id {
        Some(user_id) => format!("{}:user:{user_id}", prefix::POPULAR_BOOKS),
        None => prefix::POPULAR_BOOKS.to_string(),
    };
    let key = cache_key(&scope, &[("limit", &limit.to_string())]);
    if let Ok(Some(cached)) = state.cache().get(&key).await {
        if let Ok(response) = serde_json::from_value::<RecommendationResponse>(cached) {
            record_served(&state, &response);
            return Json(response);
        }
    }

    let response = match popular_inner(&state, query.user_id, limit).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "popular recommendation failed");
            RecommendationResponse::empty("Popular books are not available")
        }
    };

    if !response.recommendations.is_empty() {
        if let Ok(value) = serde_json::to_value(&response) {
            let ttl = state.config().popular_books_ttl();
            let _ = state.cache().set(&key, value, Some(ttl)).await;
        }
    }
    record_served(&state, &response);
    Json(response)
}

async fn popular_inner(
    state: &AppState,
    user_id: Option<Uuid>,
    limit: usize,
) -> anyhow::Result<RecommendationResponse> {
    let store = state.store();
    let (seen, languages) = match user_id {
        Some(user_id) => (
            store.interacted_book_names(user_id).await?,
            state.detector().user_languages(user_id).await,
        ),
        None => (Vec::new(), Vec::new()),
    };

    // Over-fetch when filtering so the response still fills the limit.
    let fetch = if user_id.is_some() { limit * 3 } else { limit };
    let books = store.popular(fetch).await?;

    let recommendations: Vec<serde_json::Value> = books
        .iter()
        .filter(|book| !seen.contains(&book.name))
        .filter(|book| meets_language_requirement(Some(&book.language), &languages))
        .take(limit)
        .map(|book| {
            let mut value = book.to_summary_json();
            if let Some(object) = value.as_object_mut() {
                object.insert("algorithm".into(), serde_json::json!("popularity"));
                object.insert(
                    "popularity_score".into(),
                    serde_json::json!(book.popularity_score),
                );
            }
            value
        })
        .collect();

    if recommendations.is_empty() {
        return Ok(RecommendationResponse::empty("No popular books available"));
    }
    Ok(RecommendationResponse::new(
        recommendations,
        "Most popular books right now",
    ))
}

/// Kick off a full content-model rebuild in the background.
pub(crate) async fn train_content(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.content_engine();
    tokio::spawn(async move {
        match engine.train().await {
            Ok(trained) => info!(trained, "content model training finished"),
            Err(err) => error!(error = ?err, "content model training failed"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "accepted"})),
    )
        .into_response()
}
