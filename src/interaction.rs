//! Interaction handling: the like/dislike entry point that keeps the
//! interaction row, genre tallies, author affinity, user languages, caches,
//! and the retraining counter consistent.
//!
//! One interaction per (user, book): a later action overwrites the former
//! in place, and the overwrite symmetrically undoes the genre/author deltas
//! of the previous action before applying the new one.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{CacheLayer, prefix};
use crate::engine::authors::AuthorAffinityStore;
use crate::observability::metrics::Metrics;
use crate::store::models::{Action, Interaction};
use crate::store::traits::{CatalogStore, InteractionStore, UserProfileStore};
use crate::trainer::RetrainingTrigger;

pub struct InteractionService {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    profiles: Arc<dyn UserProfileStore>,
    affinity: Arc<AuthorAffinityStore>,
    trigger: Arc<RetrainingTrigger>,
    cache: Arc<dyn CacheLayer>,
    metrics: Arc<Metrics>,
}

impl InteractionService {
    #[must_use]
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        profiles: Arc<dyn UserProfileStore>,
        affinity: Arc<AuthorAffinityStore>,
        trigger: Arc<RetrainingTrigger>,
        cache: Arc<dyn CacheLayer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            interactions,
            catalog,
            profiles,
            affinity,
            trigger,
            cache,
            metrics,
        }
    }

    /// Record a like or dislike. Applied in request order per user; reads
    /// served from cache may lag until invalidation lands.
    pub async fn record(&self, user_id: Uuid, book_name: &str, action: Action) -> Result<()> {
        let book = self
            .catalog
            .get_by_name(book_name)
            .await?
            .with_context(|| format!("unknown book: {book_name}"))?;

        let existing = self.interactions.get(user_id, &book.name).await?;
        if existing.as_ref().is_some_and(|prior| prior.action == action) {
            // Same action twice is a no-op.
            return Ok(());
        }

        // Reading a book in some language is a signal the user reads it.
        if !book.language.is_empty() {
            if let Err(err) = self.profiles.add_language(user_id, &book.language).await {
                warn!(user_id = %user_id, error = %err, "failed to update user languages");
            }
        }

        let top_before = self.affinity.top(user_id).await?.map(|p| p.author_name);

        if let Some(prior) = &existing {
            // Overwrite: undo the previous action's deltas first.
            self.interactions
                .remove_genre_counts(user_id, &prior.book_genres, prior.action)
                .await?;
            self.affinity
                .remove(user_id, &prior.book_author, prior.action, &prior.book_name)
                .await?;
        }

        self.interactions
            .upsert(&Interaction {
                user_id,
                book_name: book.name.clone(),
                book_author: book.author.clone(),
                action,
                timestamp: Utc::now(),
                book_genres: book.genres.clone(),
            })
            .await?;
        self.interactions
            .add_genre_counts(user_id, &book.genres, action)
            .await?;
        self.affinity
            .update(user_id, &book.author, action, &book.name)
            .await?;

        let top_after = self.affinity.top(user_id).await?.map(|p| p.author_name);
        self.invalidate_user_caches(user_id, top_before != top_after)
            .await;

        // Counter failures never fail the interaction itself.
        if let Err(err) = self.trigger.increment().await {
            warn!(user_id = %user_id, error = %err, "failed to increment retraining counter");
        }
        self.metrics.interactions_recorded.inc();
        Ok(())
    }

    /// Delete a prior interaction and reverse its deltas exactly.
    pub async fn remove(&self, user_id: Uuid, book_name: &str) -> Result<bool> {
        let Some(prior) = self.interactions.get(user_id, book_name).await? else {
            return Ok(false);
        };

        let top_before = self.affinity.top(user_id).await?.map(|p| p.author_name);

        self.interactions.delete(user_id, book_name).await?;
        self.interactions
            .remove_genre_counts(user_id, &prior.book_genres, prior.action)
            .await?;
        self.affinity
            .remove(user_id, &prior.book_author, prior.action, &prior.book_name)
            .await?;

        let top_after = self.affinity.top(user_id).await?.map(|p| p.author_name);
        self.invalidate_user_caches(user_id, top_before != top_after)
            .await;
        Ok(true)
    }

    /// Clear the user's recommendation caches. Author-based caches are only
    /// flushed when the top author actually changed, so non-top-author
    /// churn stays cheap.
    async fn invalidate_user_caches(&self, user_id: Uuid, top_author_changed: bool) {
        let mut prefixes = vec![
            prefix::COLLABORATIVE,
            prefix::CONTENT_BASED,
            prefix::CONTINUE_READING,
        ];
        if top_author_changed {
            prefixes.push(prefix::AUTHOR_BASED);
        }
        for cache_prefix in prefixes {
            let pattern = format!("{cache_prefix}:user:{user_id}:*");
            if let Err(err) = self.cache.delete_pattern(&pattern).await {
                warn!(user_id = %user_id, pattern, error = %err, "cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;
    use crate::store::models::BookRecord;
    use crate::store::traits::CounterStore;
    use crate::trainer::task::testing::ScriptedTrainingTask;
    use prometheus::Registry;

    fn book(name: &str, author: &str, genres: &[&str]) -> BookRecord {
        BookRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            author: author.to_string(),
            genres: genres.iter().map(ToString::to_string).collect(),
            summary: "s".to_string(),
            year: 2000,
            language: "english".to_string(),
            star_rating: Some(4.0),
            num_ratings: 10,
            popularity_score: 1.0,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        service: InteractionService,
        affinity: Arc<AuthorAffinityStore>,
    }

    fn fixture(threshold: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new(threshold));
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(Metrics::new(&Registry::new()).unwrap());
        let affinity = Arc::new(AuthorAffinityStore::new(store.clone()));
        let trigger = Arc::new(RetrainingTrigger::new(
            store.clone(),
            cache.clone(),
            Arc::new(ScriptedTrainingTask::succeeding("")),
            vec![],
            metrics.clone(),
            threshold,
            std::time::Duration::from_secs(5),
        ));
        let service = InteractionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            affinity.clone(),
            trigger,
            cache.clone(),
            metrics,
        );
        Fixture {
            store,
            cache,
            service,
            affinity,
        }
    }

    #[tokio::test]
    async fn like_records_row_genres_author_and_counter() {
        let f = fixture(100);
        let user = Uuid::new_v4();
        f.store.add_book(book("A", "X", &["Fantasy"])).await;

        f.service.record(user, "A", Action::Like).await.unwrap();

        let row = f.store.get(user, "A").await.unwrap().expect("row");
        assert_eq!(row.action, Action::Like);
        assert_eq!(row.book_genres, vec!["Fantasy".to_string()]);

        let top = f.affinity.top(user).await.unwrap().expect("top author");
        assert_eq!(top.author_name, "X");
        assert_eq!(top.preference_count, 1);

        let genres = f.store.top_genres(user, Action::Like, 10).await.unwrap();
        assert_eq!(genres[0].genre, "Fantasy");
        assert_eq!(f.store.state().await.unwrap().current_count, 1);
        assert_eq!(
            f.store.languages(user).await.unwrap(),
            vec!["english".to_string()]
        );
    }

    #[tokio::test]
    async fn overwrite_undoes_previous_deltas() {
        let f = fixture(100);
        let user = Uuid::new_v4();
        f.store.add_book(book("A", "X", &["Fantasy"])).await;

        f.service.record(user, "A", Action::Like).await.unwrap();
        f.service.record(user, "A", Action::Dislike).await.unwrap();

        // Single row, overwritten in place.
        let row = f.store.get(user, "A").await.unwrap().expect("row");
        assert_eq!(row.action, Action::Dislike);
        assert_eq!(f.store.count_for_user(user).await.unwrap(), 1);

        // Author entry removed: the like was undone before the dislike.
        assert!(f.affinity.top(user).await.unwrap().is_none());

        // Genre tallies moved from like to dislike.
        assert!(f.store.top_genres(user, Action::Like, 10).await.unwrap().is_empty());
        let disliked = f.store.top_genres(user, Action::Dislike, 10).await.unwrap();
        assert_eq!(disliked[0].genre, "Fantasy");
    }

    #[tokio::test]
    async fn repeated_same_action_is_a_no_op() {
        let f = fixture(100);
        let user = Uuid::new_v4();
        f.store.add_book(book("A", "X", &["Fantasy"])).await;

        f.service.record(user, "A", Action::Like).await.unwrap();
        f.service.record(user, "A", Action::Like).await.unwrap();

        assert_eq!(f.store.state().await.unwrap().current_count, 1);
        let top = f.affinity.top(user).await.unwrap().expect("top author");
        assert_eq!(top.preference_count, 1);
    }

    #[tokio::test]
    async fn author_cache_flushed_only_on_top_change() {
        let f = fixture(100);
        let user = Uuid::new_v4();
        f.store.add_book(book("A", "X", &["Fantasy"])).await;
        f.store.add_book(book("B", "X", &["Fantasy"])).await;
        f.store.add_book(book("C", "Y", &["Mystery"])).await;

        // Top becomes X.
        f.service.record(user, "A", Action::Like).await.unwrap();

        let author_key = format!("author_based:user:{user}:abc");
        f.cache
            .set(&author_key, serde_json::json!(1), None)
            .await
            .unwrap();

        // X stays on top: author-based cache must survive.
        f.service.record(user, "B", Action::Like).await.unwrap();
        assert!(f.cache.get(&author_key).await.unwrap().is_some());

        // Removing both X likes hands the top to Y eventually; the first
        // change that flips the top author flushes the cache.
        f.service.record(user, "C", Action::Like).await.unwrap();
        f.service.remove(user, "A").await.unwrap();
        f.service.remove(user, "B").await.unwrap();
        assert!(f.cache.get(&author_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_reverses_everything() {
        let f = fixture(100);
        let user = Uuid::new_v4();
        f.store.add_book(book("A", "X", &["Fantasy"])).await;

        f.service.record(user, "A", Action::Like).await.unwrap();
        assert!(f.service.remove(user, "A").await.unwrap());

        assert!(f.store.get(user, "A").await.unwrap().is_none());
        assert!(f.affinity.top(user).await.unwrap().is_none());
        assert!(f.store.top_genres(user, Action::Like, 10).await.unwrap().is_empty());
        // Removing something that does not exist reports false.
        assert!(!f.service.remove(user, "A").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_book_is_an_error() {
        let f = fixture(100);
        assert!(
            f.service
                .record(Uuid::new_v4(), "missing", Action::Like)
                .await
                .is_err()
        );
    }
}
