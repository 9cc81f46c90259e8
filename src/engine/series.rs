//! Continue-reading recommendations: walk the user's liked books by
//! popularity and suggest the next book in each detected series.
//!
//! The external series detector is consumed through a cache-fronted lookup;
//! failed or malformed responses become "no recommendation" and are cached
//! briefly so the collaborator is not hammered.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{CacheLayer, cache_key, prefix};
use crate::clients::{SeriesDetector, SeriesInfo};
use crate::engine::RecommendationResponse;
use crate::observability::metrics::Metrics;
use crate::store::models::Action;
use crate::store::traits::{CatalogStore, InteractionStore};

/// How many liked books the series walk inspects at most per request.
const SERIES_SCAN_LIMIT: usize = 25;

/// Cache-fronted series lookup.
pub struct SeriesLookupService {
    detector: Option<Arc<dyn SeriesDetector>>,
    cache: Arc<dyn CacheLayer>,
    metrics: Arc<Metrics>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl SeriesLookupService {
    #[must_use]
    pub fn new(
        detector: Option<Arc<dyn SeriesDetector>>,
        cache: Arc<dyn CacheLayer>,
        metrics: Arc<Metrics>,
        ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            detector,
            cache,
            metrics,
            ttl,
            negative_ttl,
        }
    }

    /// Series info for a (title, author), or `None` when the book is not a
    /// series, the collaborator is unavailable, or its response is
    /// malformed. Negative outcomes are cached with the short TTL.
    pub async fn series_info(&self, title: &str, author: &str) -> Option<SeriesInfo> {
        let key = cache_key(prefix::SERIES, &[("title", title), ("author", author)]);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if cached.is_null() {
                return None;
            }
            if let Ok(info) = serde_json::from_value::<SeriesInfo>(cached) {
                return Some(info);
            }
        }

        let detector = self.detector.as_ref()?;
        match detector.lookup(title, author).await {
            Ok(info) if info.is_series && info.next_book.is_some() => {
                if let Ok(value) = serde_json::to_value(&info) {
                    let _ = self.cache.set(&key, value, Some(self.ttl)).await;
                }
                Some(info)
            }
            Ok(_) => {
                let _ = self
                    .cache
                    .set(&key, serde_json::Value::Null, Some(self.ttl))
                    .await;
                None
            }
            Err(err) => {
                // Malformed or failed response: treat as no recommendation,
                // cache briefly.
                warn!(title, error = %err, "series lookup failed");
                self.metrics.series_lookup_failures.inc();
                let _ = self
                    .cache
                    .set(&key, serde_json::Value::Null, Some(self.negative_ttl))
                    .await;
                None
            }
        }
    }
}

pub struct ContinueReadingEngine {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    series: Arc<SeriesLookupService>,
    cache: Arc<dyn CacheLayer>,
    cache_ttl: Duration,
}

impl ContinueReadingEngine {
    #[must_use]
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        series: Arc<SeriesLookupService>,
        cache: Arc<dyn CacheLayer>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            interactions,
            catalog,
            series,
            cache,
            cache_ttl,
        }
    }

    pub async fn recommend(&self, user_id: Uuid, limit: usize) -> RecommendationResponse {
        let scope = format!("{}:user:{user_id}", prefix::CONTINUE_READING);
        let key = cache_key(&scope, &[("limit", &limit.to_string())]);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(response) = serde_json::from_value(cached) {
                return response;
            }
        }

        let response = match self.recommend_inner(user_id, limit).await {
            Ok(response) => response,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "continue-reading recommendation failed");
                RecommendationResponse::empty("Continue-reading recommendations are not available")
            }
        };

        if !response.recommendations.is_empty() {
            if let Ok(value) = serde_json::to_value(&response) {
                let _ = self.cache.set(&key, value, Some(self.cache_ttl)).await;
            }
        }
        response
    }

    async fn recommend_inner(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<RecommendationResponse> {
        let likes = self
            .interactions
            .list_for_user(user_id, Some(Action::Like), 1000)
            .await?;
        if likes.is_empty() {
            return Ok(RecommendationResponse::empty(
                "Like some books to see continue-reading recommendations",
            ));
        }

        let seen: FxHashSet<String> = self
            .interactions
            .interacted_book_names(user_id)
            .await?
            .into_iter()
            .collect();

        // Well-known books first: the popularity proxy orders the walk.
        let mut liked_books = Vec::new();
        for like in &likes {
            if let Some(book) = self.catalog.get_by_name(&like.book_name).await? {
                liked_books.push(book);
            }
        }
        liked_books.sort_by(|a, b| b.popularity_score.total_cmp(&a.popularity_score));
        liked_books.truncate(SERIES_SCAN_LIMIT);

        let mut recommendations = Vec::new();
        let mut suggested: FxHashSet<String> = FxHashSet::default();
        for book in &liked_books {
            if recommendations.len() >= limit {
                break;
            }
            let Some(info) = self.series.series_info(&book.name, &book.author).await else {
                continue;
            };
            let Some(next) = info.next_book else {
                continue;
            };
            if seen.contains(&next.title) || !suggested.insert(next.title.clone()) {
                continue;
            }
            recommendations.push(serde_json::json!({
                "name": next.title,
                "author": next.author,
                "description": next.description,
                "series_name": info.series_name,
                "order_in_series": next.order_in_series,
                "based_on_book": book.name,
                "confidence": info.confidence,
                "algorithm": "series_continuation",
            }));
        }

        if recommendations.is_empty() {
            return Ok(RecommendationResponse::empty(
                "No unread series continuations found",
            ));
        }
        Ok(RecommendationResponse::new(
            recommendations,
            "Next books in series you started",
        ))
    }
}
