//! In-memory store used by tests and local development. Mirrors the
//! Postgres implementation's semantics, including counter atomicity.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    Action, AuthorPreference, BookRecord, CounterState, GenrePreference, Interaction,
    TrainingRecord, TrainingStatus, UserSimilarity,
};
use super::traits::{CatalogStore, CounterStore, InteractionStore, SimilarityStore,
    UserProfileStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    books: RwLock<Vec<BookRecord>>,
    interactions: RwLock<Vec<Interaction>>,
    genre_prefs: RwLock<FxHashMap<(Uuid, String, Action), i64>>,
    author_prefs: RwLock<FxHashMap<Uuid, Vec<AuthorPreference>>>,
    user_languages: RwLock<FxHashMap<Uuid, Vec<String>>>,
    registered_users: RwLock<Vec<Uuid>>,
    counter: AtomicI64,
    total_retrainings: AtomicI64,
    threshold: AtomicI64,
    training_records: RwLock<Vec<TrainingRecord>>,
    similarities: RwLock<FxHashMap<Uuid, UserSimilarity>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(threshold: i64) -> Self {
        let store = Self::default();
        store.threshold.store(threshold, Ordering::SeqCst);
        store
    }

    pub async fn add_book(&self, book: BookRecord) {
        self.books.write().await.push(book);
    }

    pub async fn add_user(&self, user_id: Uuid) {
        self.registered_users.write().await.push(user_id);
    }

    pub async fn set_similarity(&self, entry: UserSimilarity) {
        self.similarities.write().await.insert(entry.user_id, entry);
    }

    fn eligible(book: &BookRecord) -> bool {
        !book.summary.is_empty() && !book.language.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<BookRecord>> {
        let books = self.books.read().await;
        Ok(books
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<BookRecord>> {
        let books = self.books.read().await;
        Ok(books.iter().filter(|b| ids.contains(&b.id)).cloned().collect())
    }

    async fn count_eligible(&self) -> anyhow::Result<u64> {
        let books = self.books.read().await;
        Ok(books.iter().filter(|b| Self::eligible(b)).count() as u64)
    }

    async fn sample_eligible(&self, limit: usize) -> anyhow::Result<Vec<BookRecord>> {
        let books = self.books.read().await;
        let mut eligible: Vec<BookRecord> =
            books.iter().filter(|b| Self::eligible(b)).cloned().collect();
        eligible.shuffle(&mut rand::rng());
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn scan_eligible(&self, offset: u64, limit: usize) -> anyhow::Result<Vec<BookRecord>> {
        let books = self.books.read().await;
        let mut eligible: Vec<BookRecord> =
            books.iter().filter(|b| Self::eligible(b)).cloned().collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(eligible
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .collect())
    }

    async fn books_by_author(
        &self,
        author: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<BookRecord>> {
        let books = self.books.read().await;
        let mut matched: Vec<BookRecord> = books
            .iter()
            .filter(|b| b.author.eq_ignore_ascii_case(author))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.star_rating
                .unwrap_or(0.0)
                .total_cmp(&a.star_rating.unwrap_or(0.0))
                .then(b.num_ratings.cmp(&a.num_ratings))
        });
        matched.truncate(limit);
        Ok(matched)
    }

    async fn popular(&self, limit: usize) -> anyhow::Result<Vec<BookRecord>> {
        let books = self.books.read().await;
        let mut all: Vec<BookRecord> = books.clone();
        all.sort_by(|a, b| {
            b.popularity_score
                .total_cmp(&a.popularity_score)
                .then(b.num_ratings.cmp(&a.num_ratings))
        });
        all.truncate(limit);
        Ok(all)
    }

    async fn language_of(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get_by_name(name).await?.map(|b| b.language))
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn get(&self, user_id: Uuid, book_name: &str) -> anyhow::Result<Option<Interaction>> {
        let interactions = self.interactions.read().await;
        Ok(interactions
            .iter()
            .find(|i| i.user_id == user_id && i.book_name == book_name)
            .cloned())
    }

    async fn upsert(&self, interaction: &Interaction) -> anyhow::Result<()> {
        let mut interactions = self.interactions.write().await;
        if let Some(existing) = interactions
            .iter_mut()
            .find(|i| i.user_id == interaction.user_id && i.book_name == interaction.book_name)
        {
            *existing = interaction.clone();
        } else {
            interactions.push(interaction.clone());
        }
        Ok(())
    }

    async fn delete(&self, user_id: Uuid, book_name: &str) -> anyhow::Result<bool> {
        let mut interactions = self.interactions.write().await;
        let before = interactions.len();
        interactions.retain(|i| !(i.user_id == user_id && i.book_name == book_name));
        Ok(interactions.len() < before)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        action: Option<Action>,
        limit: usize,
    ) -> anyhow::Result<Vec<Interaction>> {
        let interactions = self.interactions.read().await;
        let mut matched: Vec<Interaction> = interactions
            .iter()
            .filter(|i| i.user_id == user_id && action.is_none_or(|a| i.action == a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn interacted_book_names(&self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let interactions = self.interactions.read().await;
        Ok(interactions
            .iter()
            .filter(|i| i.user_id == user_id)
            .map(|i| i.book_name.clone())
            .collect())
    }

    async fn count_for_user(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let interactions = self.interactions.read().await;
        Ok(interactions.iter().filter(|i| i.user_id == user_id).count() as u64)
    }

    async fn all(&self) -> anyhow::Result<Vec<Interaction>> {
        Ok(self.interactions.read().await.clone())
    }

    async fn add_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> anyhow::Result<()> {
        let mut prefs = self.genre_prefs.write().await;
        for genre in genres.iter().filter(|g| !g.is_empty()) {
            *prefs.entry((user_id, genre.clone(), action)).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn remove_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> anyhow::Result<()> {
        let mut prefs = self.genre_prefs.write().await;
        for genre in genres.iter().filter(|g| !g.is_empty()) {
            let key = (user_id, genre.clone(), action);
            if let Some(count) = prefs.get_mut(&key) {
                *count -= 1;
                if *count <= 0 {
                    prefs.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn top_genres(
        &self,
        user_id: Uuid,
        action: Action,
        limit: usize,
    ) -> anyhow::Result<Vec<GenrePreference>> {
        let prefs = self.genre_prefs.read().await;
        let mut matched: Vec<GenrePreference> = prefs
            .iter()
            .filter(|((uid, _, a), _)| *uid == user_id && *a == action)
            .map(|((_, genre, _), count)| GenrePreference {
                genre: genre.clone(),
                count: *count,
            })
            .collect();
        matched.sort_by(|a, b| b.count.cmp(&a.count));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn load_author_prefs(&self, user_id: Uuid) -> anyhow::Result<Vec<AuthorPreference>> {
        let prefs = self.author_prefs.read().await;
        Ok(prefs.get(&user_id).cloned().unwrap_or_default())
    }

    async fn save_author_prefs(
        &self,
        user_id: Uuid,
        prefs: &[AuthorPreference],
    ) -> anyhow::Result<()> {
        self.author_prefs.write().await.insert(user_id, prefs.to_vec());
        Ok(())
    }
}

#[async_trait]
impl UserProfileStore for MemoryStore {
    async fn languages(&self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let languages = self.user_languages.read().await;
        Ok(languages.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_language(&self, user_id: Uuid, language: &str) -> anyhow::Result<()> {
        let mut languages = self.user_languages.write().await;
        let entry = languages.entry(user_id).or_default();
        if !entry.iter().any(|l| l == language) {
            entry.push(language.to_string());
        }
        Ok(())
    }

    async fn registered_user_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        Ok(self.registered_users.read().await.clone())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn state(&self) -> anyhow::Result<CounterState> {
        let now = Utc::now();
        Ok(CounterState {
            current_count: self.counter.load(Ordering::SeqCst),
            threshold: self.threshold.load(Ordering::SeqCst),
            total_retrainings: self.total_retrainings.load(Ordering::SeqCst),
            last_updated: now,
            last_reset: now,
        })
    }

    async fn increment(&self) -> anyhow::Result<i64> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn try_claim_threshold(&self, threshold: i64) -> anyhow::Result<bool> {
        // CAS loop: only one concurrent caller observes >= threshold and
        // swaps it to zero.
        loop {
            let current = self.counter.load(Ordering::SeqCst);
            if current < threshold {
                return Ok(false);
            }
            if self
                .counter
                .compare_exchange(current, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(true);
            }
        }
    }

    async fn bump_total_retrainings(&self) -> anyhow::Result<()> {
        self.total_retrainings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_training_record(&self, trigger_count: i64) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.training_records.write().await.push(TrainingRecord {
            id,
            trigger_count,
            training_started: Utc::now(),
            training_completed: None,
            training_duration_seconds: None,
            status: TrainingStatus::InProgress,
            error_message: None,
            model_metrics: serde_json::json!({}),
        });
        Ok(id)
    }

    async fn complete_training_record(
        &self,
        id: Uuid,
        status: TrainingStatus,
        duration_seconds: f64,
        error_message: Option<&str>,
        model_metrics: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut records = self.training_records.write().await;
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == TrainingStatus::InProgress)
        {
            record.training_completed = Some(Utc::now());
            record.training_duration_seconds = Some(duration_seconds);
            record.status = status;
            record.error_message = error_message.map(ToString::to_string);
            record.model_metrics = model_metrics;
        }
        Ok(())
    }

    async fn recent_training_records(&self, limit: usize) -> anyhow::Result<Vec<TrainingRecord>> {
        let records = self.training_records.read().await;
        let mut all = records.clone();
        all.sort_by(|a, b| b.training_started.cmp(&a.training_started));
        all.truncate(limit);
        Ok(all)
    }
}

#[async_trait]
impl SimilarityStore for MemoryStore {
    async fn replace_all(&self, entries: &[UserSimilarity]) -> anyhow::Result<()> {
        let mut similarities = self.similarities.write().await;
        similarities.clear();
        for entry in entries {
            similarities.insert(entry.user_id, entry.clone());
        }
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<UserSimilarity>> {
        Ok(self.similarities.read().await.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_increments_and_claims_once() {
        let store = MemoryStore::new(5);
        for _ in 0..5 {
            store.increment().await.unwrap();
        }
        assert!(store.try_claim_threshold(5).await.unwrap());
        assert!(!store.try_claim_threshold(5).await.unwrap());
        assert_eq!(store.state().await.unwrap().current_count, 0);
    }

    #[tokio::test]
    async fn genre_counts_remove_at_zero() {
        let store = MemoryStore::new(10);
        let user = Uuid::new_v4();
        let genres = vec!["Fantasy".to_string()];
        store.add_genre_counts(user, &genres, Action::Like).await.unwrap();
        store.remove_genre_counts(user, &genres, Action::Like).await.unwrap();
        let top = store.top_genres(user, Action::Like, 10).await.unwrap();
        assert!(top.is_empty());
    }
}
