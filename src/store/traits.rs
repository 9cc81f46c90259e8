/// ストアトレイト - データアクセス層の抽象化
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    Action, AuthorPreference, BookRecord, CounterState, GenrePreference, Interaction,
    TrainingRecord, TrainingStatus, UserSimilarity,
};

/// Catalog store: read-only access to book records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<BookRecord>>;

    /// Batch fetch by id set, order unspecified.
    async fn get_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<BookRecord>>;

    /// Count of books eligible for content training (non-empty summary and
    /// language).
    async fn count_eligible(&self) -> anyhow::Result<u64>;

    /// Random sample of eligible books, at most `limit` records.
    async fn sample_eligible(&self, limit: usize) -> anyhow::Result<Vec<BookRecord>>;

    /// Chunked scan over eligible books in a stable order.
    async fn scan_eligible(&self, offset: u64, limit: usize) -> anyhow::Result<Vec<BookRecord>>;

    /// Books by an exact author name (case-insensitive), best rated first.
    async fn books_by_author(&self, author: &str, limit: usize)
    -> anyhow::Result<Vec<BookRecord>>;

    /// Most popular books by popularity score.
    async fn popular(&self, limit: usize) -> anyhow::Result<Vec<BookRecord>>;

    /// Language tag of a book, if the book exists.
    async fn language_of(&self, name: &str) -> anyhow::Result<Option<String>>;
}

/// Interaction store: per-user like/dislike rows plus the genre and author
/// preference tallies derived from them.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn get(&self, user_id: Uuid, book_name: &str) -> anyhow::Result<Option<Interaction>>;

    /// Insert or overwrite the single row for (user, book).
    async fn upsert(&self, interaction: &Interaction) -> anyhow::Result<()>;

    /// Delete the row for (user, book). Returns whether a row existed.
    async fn delete(&self, user_id: Uuid, book_name: &str) -> anyhow::Result<bool>;

    /// Interactions for a user, newest first, optionally filtered by action.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        action: Option<Action>,
        limit: usize,
    ) -> anyhow::Result<Vec<Interaction>>;

    /// Names of every book the user has interacted with.
    async fn interacted_book_names(&self, user_id: Uuid) -> anyhow::Result<Vec<String>>;

    async fn count_for_user(&self, user_id: Uuid) -> anyhow::Result<u64>;

    /// Every interaction row, for the collaborative matrix build.
    async fn all(&self) -> anyhow::Result<Vec<Interaction>>;

    /// Increment the per-genre tally for the given action by one each.
    async fn add_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> anyhow::Result<()>;

    /// Decrement per-genre tallies, removing entries that reach zero.
    async fn remove_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> anyhow::Result<()>;

    async fn top_genres(
        &self,
        user_id: Uuid,
        action: Action,
        limit: usize,
    ) -> anyhow::Result<Vec<GenrePreference>>;

    /// Load the user's sorted author preference list (descending by count).
    async fn load_author_prefs(&self, user_id: Uuid) -> anyhow::Result<Vec<AuthorPreference>>;

    /// Replace the user's sorted author preference list.
    async fn save_author_prefs(
        &self,
        user_id: Uuid,
        prefs: &[AuthorPreference],
    ) -> anyhow::Result<()>;
}

/// User profile store: declared language tags and registered users.
#[async_trait]
pub trait UserProfileStore: Send + Sync {
    async fn languages(&self, user_id: Uuid) -> anyhow::Result<Vec<String>>;

    /// Append a language to the user's list if not already present.
    async fn add_language(&self, user_id: Uuid, language: &str) -> anyhow::Result<()>;

    async fn registered_user_ids(&self) -> anyhow::Result<Vec<Uuid>>;
}

/// Shared interaction counter and training history.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn state(&self) -> anyhow::Result<CounterState>;

    /// Atomically increment the counter and return the post-increment value.
    async fn increment(&self) -> anyhow::Result<i64>;

    /// Atomically reset the counter to zero if it is still at or above
    /// `threshold`. Returns `true` only for the caller that won the reset;
    /// concurrent crossings of the same threshold see `false`.
    async fn try_claim_threshold(&self, threshold: i64) -> anyhow::Result<bool>;

    async fn bump_total_retrainings(&self) -> anyhow::Result<()>;

    /// Append an `in_progress` training record and return its id.
    async fn insert_training_record(&self, trigger_count: i64) -> anyhow::Result<Uuid>;

    /// Fill the completion fields of a training record exactly once.
    async fn complete_training_record(
        &self,
        id: Uuid,
        status: TrainingStatus,
        duration_seconds: f64,
        error_message: Option<&str>,
        model_metrics: serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn recent_training_records(&self, limit: usize) -> anyhow::Result<Vec<TrainingRecord>>;
}

/// Precomputed top-K similar users, replaced wholesale on every training run.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn replace_all(&self, entries: &[UserSimilarity]) -> anyhow::Result<()>;

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<UserSimilarity>>;
}
