/// SqlxStore - Postgres 実装
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::models::{
    Action, AuthorPreference, BookRecord, CounterState, GenrePreference, Interaction,
    TrainingRecord, TrainingStatus, UserSimilarity,
};
use super::traits::{CatalogStore, CounterStore, InteractionStore, SimilarityStore,
    UserProfileStore};

const COUNTER_TYPE: &str = "like_dislike_interactions";

/// Postgres-backed implementation of every store trait, sharing one pool.
#[derive(Debug, Clone)]
pub struct SqlxStore {
    pool: PgPool,
    counter_threshold: i64,
}

impl SqlxStore {
    #[must_use]
    pub fn new(pool: PgPool, counter_threshold: i64) -> Self {
        Self {
            pool,
            counter_threshold,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn book_from_row(row: &PgRow) -> BookRecord {
    BookRecord {
        id: row.get("id"),
        name: row.get("name"),
        author: row.get("author"),
        genres: row.get("genres"),
        summary: row.get("summary"),
        year: row.get("year"),
        language: row.get("language"),
        star_rating: row.get("star_rating"),
        num_ratings: row.get("num_ratings"),
        popularity_score: row.get("popularity_score"),
    }
}

fn interaction_from_row(row: &PgRow) -> Result<Interaction> {
    let action: String = row.get("action");
    Ok(Interaction {
        user_id: row.get("user_id"),
        book_name: row.get("book_name"),
        book_author: row.get("book_author"),
        action: action.parse()?,
        timestamp: row.get("timestamp"),
        book_genres: row.get("book_genres"),
    })
}

const ELIGIBLE_FILTER: &str = "summary IS NOT NULL AND summary <> '' \
     AND language IS NOT NULL AND language <> ''";

#[async_trait]
impl CatalogStore for SqlxStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<BookRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            WHERE LOWER(name) = LOWER($1)
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch book by name")?;

        Ok(row.as_ref().map(book_from_row))
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<BookRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            WHERE id = ANY($1)
            ",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to batch fetch books")?;

        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn count_eligible(&self) -> Result<u64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM books WHERE {ELIGIBLE_FILTER}"
        ))
        .fetch_one(&self.pool)
        .await
        .context("failed to count eligible books")?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn sample_eligible(&self, limit: usize) -> Result<Vec<BookRecord>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            WHERE {ELIGIBLE_FILTER}
            ORDER BY random()
            LIMIT $1
            "
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to sample eligible books")?;

        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn scan_eligible(&self, offset: u64, limit: usize) -> Result<Vec<BookRecord>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            WHERE {ELIGIBLE_FILTER}
            ORDER BY id
            OFFSET $1 LIMIT $2
            "
        ))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to scan eligible books")?;

        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn books_by_author(&self, author: &str, limit: usize) -> Result<Vec<BookRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            WHERE LOWER(author) = LOWER($1)
            ORDER BY star_rating DESC NULLS LAST, num_ratings DESC
            LIMIT $2
            ",
        )
        .bind(author)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch books by author")?;

        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn popular(&self, limit: usize) -> Result<Vec<BookRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, author, genres, summary, year, language,
                   star_rating, num_ratings, popularity_score
            FROM books
            ORDER BY popularity_score DESC, num_ratings DESC
            LIMIT $1
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch popular books")?;

        Ok(rows.iter().map(book_from_row).collect())
    }

    async fn language_of(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT language FROM books WHERE LOWER(name) = LOWER($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch book language")?;
        Ok(row.map(|r| r.get("language")))
    }
}

#[async_trait]
impl InteractionStore for SqlxStore {
    async fn get(&self, user_id: Uuid, book_name: &str) -> Result<Option<Interaction>> {
        let row = sqlx::query(
            r"
            SELECT user_id, book_name, book_author, action, timestamp, book_genres
            FROM user_book_interactions
            WHERE user_id = $1 AND book_name = $2
            ",
        )
        .bind(user_id)
        .bind(book_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch interaction")?;

        row.as_ref().map(interaction_from_row).transpose()
    }

    async fn upsert(&self, interaction: &Interaction) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO user_book_interactions
                (user_id, book_name, book_author, action, timestamp, book_genres)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, book_name) DO UPDATE
            SET action = EXCLUDED.action,
                timestamp = EXCLUDED.timestamp,
                book_genres = EXCLUDED.book_genres
            ",
        )
        .bind(interaction.user_id)
        .bind(&interaction.book_name)
        .bind(&interaction.book_author)
        .bind(interaction.action.as_str())
        .bind(interaction.timestamp)
        .bind(&interaction.book_genres)
        .execute(&self.pool)
        .await
        .context("failed to upsert interaction")?;
        Ok(())
    }

    async fn delete(&self, user_id: Uuid, book_name: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM user_book_interactions WHERE user_id = $1 AND book_name = $2",
        )
        .bind(user_id)
        .bind(book_name)
        .execute(&self.pool)
        .await
        .context("failed to delete interaction")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        action: Option<Action>,
        limit: usize,
    ) -> Result<Vec<Interaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let fetched = if let Some(action) = action {
            sqlx::query(
                r"
                SELECT user_id, book_name, book_author, action, timestamp, book_genres
                FROM user_book_interactions
                WHERE user_id = $1 AND action = $2
                ORDER BY timestamp DESC
                LIMIT $3
                ",
            )
            .bind(user_id)
            .bind(action.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                SELECT user_id, book_name, book_author, action, timestamp, book_genres
                FROM user_book_interactions
                WHERE user_id = $1
                ORDER BY timestamp DESC
                LIMIT $2
                ",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        };
        let rows = fetched.context("failed to list interactions")?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn interacted_book_names(&self, user_id: Uuid) -> Result<Vec<String>> {
        let rows =
            sqlx::query("SELECT book_name FROM user_book_interactions WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .context("failed to list interacted book names")?;
        Ok(rows.iter().map(|r| r.get("book_name")).collect())
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS count FROM user_book_interactions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .context("failed to count interactions")?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn all(&self) -> Result<Vec<Interaction>> {
        let rows = sqlx::query(
            r"
            SELECT user_id, book_name, book_author, action, timestamp, book_genres
            FROM user_book_interactions
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch all interactions")?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn add_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> Result<()> {
        for genre in genres.iter().filter(|g| !g.is_empty()) {
            sqlx::query(
                r"
                INSERT INTO user_genre_preferences (user_id, genre, action, count, last_updated)
                VALUES ($1, $2, $3, 1, NOW())
                ON CONFLICT (user_id, genre, action) DO UPDATE
                SET count = user_genre_preferences.count + 1, last_updated = NOW()
                ",
            )
            .bind(user_id)
            .bind(genre)
            .bind(action.as_str())
            .execute(&self.pool)
            .await
            .context("failed to add genre count")?;
        }
        Ok(())
    }

    async fn remove_genre_counts(
        &self,
        user_id: Uuid,
        genres: &[String],
        action: Action,
    ) -> Result<()> {
        for genre in genres.iter().filter(|g| !g.is_empty()) {
            sqlx::query(
                r"
                UPDATE user_genre_preferences
                SET count = count - 1, last_updated = NOW()
                WHERE user_id = $1 AND genre = $2 AND action = $3
                ",
            )
            .bind(user_id)
            .bind(genre)
            .bind(action.as_str())
            .execute(&self.pool)
            .await
            .context("failed to decrement genre count")?;
        }
        // Drop tallies that reached zero in the same pass.
        sqlx::query("DELETE FROM user_genre_preferences WHERE user_id = $1 AND count <= 0")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("failed to prune zero genre counts")?;
        Ok(())
    }

    async fn top_genres(
        &self,
        user_id: Uuid,
        action: Action,
        limit: usize,
    ) -> Result<Vec<GenrePreference>> {
        let rows = sqlx::query(
            r"
            SELECT genre, count
            FROM user_genre_preferences
            WHERE user_id = $1 AND action = $2
            ORDER BY count DESC
            LIMIT $3
            ",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch top genres")?;

        Ok(rows
            .iter()
            .map(|r| GenrePreference {
                genre: r.get("genre"),
                count: r.get("count"),
            })
            .collect())
    }

    async fn load_author_prefs(&self, user_id: Uuid) -> Result<Vec<AuthorPreference>> {
        let row = sqlx::query(
            "SELECT sorted_authors FROM user_author_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load author preferences")?;

        match row {
            Some(row) => {
                let raw: serde_json::Value = row.get("sorted_authors");
                serde_json::from_value(raw).context("malformed sorted_authors document")
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save_author_prefs(&self, user_id: Uuid, prefs: &[AuthorPreference]) -> Result<()> {
        let doc = serde_json::to_value(prefs).context("failed to serialize author prefs")?;
        sqlx::query(
            r"
            INSERT INTO user_author_preferences (user_id, sorted_authors, total_authors, last_updated)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET sorted_authors = EXCLUDED.sorted_authors,
                total_authors = EXCLUDED.total_authors,
                last_updated = NOW()
            ",
        )
        .bind(user_id)
        .bind(doc)
        .bind(i32::try_from(prefs.len()).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .context("failed to save author preferences")?;
        Ok(())
    }
}

#[async_trait]
impl UserProfileStore for SqlxStore {
    async fn languages(&self, user_id: Uuid) -> Result<Vec<String>> {
        let row = sqlx::query("SELECT user_languages FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user languages")?;
        Ok(row
            .map(|r| r.get::<Option<Vec<String>>, _>("user_languages").unwrap_or_default())
            .unwrap_or_default())
    }

    async fn add_language(&self, user_id: Uuid, language: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET user_languages = array_append(COALESCE(user_languages, '{}'), $2)
            WHERE id = $1 AND NOT ($2 = ANY(COALESCE(user_languages, '{}')))
            ",
        )
        .bind(user_id)
        .bind(language)
        .execute(&self.pool)
        .await
        .context("failed to append user language")?;
        Ok(())
    }

    async fn registered_user_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM users")
            .fetch_all(&self.pool)
            .await
            .context("failed to list registered users")?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

#[async_trait]
impl CounterStore for SqlxStore {
    async fn state(&self) -> Result<CounterState> {
        let row = sqlx::query(
            r"
            SELECT current_count, threshold, total_retrainings, last_updated, last_reset
            FROM interaction_counters
            WHERE counter_type = $1
            ",
        )
        .bind(COUNTER_TYPE)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch counter state")?;

        match row {
            Some(row) => Ok(CounterState {
                current_count: row.get("current_count"),
                threshold: row.get("threshold"),
                total_retrainings: row.get("total_retrainings"),
                last_updated: row.get("last_updated"),
                last_reset: row.get("last_reset"),
            }),
            None => {
                let now = Utc::now();
                Ok(CounterState {
                    current_count: 0,
                    threshold: self.counter_threshold,
                    total_retrainings: 0,
                    last_updated: now,
                    last_reset: now,
                })
            }
        }
    }

    async fn increment(&self) -> Result<i64> {
        // Single-statement upsert keeps the increment atomic under
        // concurrent callers.
        let row = sqlx::query(
            r"
            INSERT INTO interaction_counters
                (counter_type, current_count, threshold, total_retrainings,
                 last_updated, last_reset, created_at)
            VALUES ($1, 1, $2, 0, NOW(), NOW(), NOW())
            ON CONFLICT (counter_type) DO UPDATE
            SET current_count = interaction_counters.current_count + 1,
                last_updated = NOW()
            RETURNING current_count
            ",
        )
        .bind(COUNTER_TYPE)
        .bind(self.counter_threshold)
        .fetch_one(&self.pool)
        .await
        .context("failed to increment interaction counter")?;
        Ok(row.get("current_count"))
    }

    async fn try_claim_threshold(&self, threshold: i64) -> Result<bool> {
        // Compare-and-set: only one concurrent crossing zeroes the counter.
        let result = sqlx::query(
            r"
            UPDATE interaction_counters
            SET current_count = 0, last_reset = NOW()
            WHERE counter_type = $1 AND current_count >= $2
            ",
        )
        .bind(COUNTER_TYPE)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .context("failed to claim counter threshold")?;
        Ok(result.rows_affected() > 0)
    }

    async fn bump_total_retrainings(&self) -> Result<()> {
        sqlx::query(
            r"
            UPDATE interaction_counters
            SET total_retrainings = total_retrainings + 1
            WHERE counter_type = $1
            ",
        )
        .bind(COUNTER_TYPE)
        .execute(&self.pool)
        .await
        .context("failed to bump total retrainings")?;
        Ok(())
    }

    async fn insert_training_record(&self, trigger_count: i64) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r"
            INSERT INTO training_history
                (id, trigger_count, training_started, training_status, model_metrics)
            VALUES ($1, $2, NOW(), $3, '{}'::JSONB)
            ",
        )
        .bind(id)
        .bind(trigger_count)
        .bind(TrainingStatus::InProgress.as_str())
        .execute(&self.pool)
        .await
        .context("failed to insert training record")?;
        Ok(id)
    }

    async fn complete_training_record(
        &self,
        id: Uuid,
        status: TrainingStatus,
        duration_seconds: f64,
        error_message: Option<&str>,
        model_metrics: serde_json::Value,
    ) -> Result<()> {
        // The in_progress guard keeps completion fields write-once.
        sqlx::query(
            r"
            UPDATE training_history
            SET training_completed = NOW(),
                training_duration_seconds = $2,
                training_status = $3,
                error_message = $4,
                model_metrics = $5
            WHERE id = $1 AND training_status = 'in_progress'
            ",
        )
        .bind(id)
        .bind(duration_seconds)
        .bind(status.as_str())
        .bind(error_message)
        .bind(model_metrics)
        .execute(&self.pool)
        .await
        .context("failed to complete training record")?;
        Ok(())
    }

    async fn recent_training_records(&self, limit: usize) -> Result<Vec<TrainingRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, trigger_count, training_started, training_completed,
                   training_duration_seconds, training_status, error_message, model_metrics
            FROM training_history
            ORDER BY training_started DESC
            LIMIT $1
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch training history")?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("training_status");
                let status = match status.as_str() {
                    "in_progress" => TrainingStatus::InProgress,
                    "success" => TrainingStatus::Success,
                    "failed" => TrainingStatus::Failed,
                    "timeout" => TrainingStatus::Timeout,
                    _ => TrainingStatus::Error,
                };
                Ok(TrainingRecord {
                    id: row.get("id"),
                    trigger_count: row.get("trigger_count"),
                    training_started: row.get::<DateTime<Utc>, _>("training_started"),
                    training_completed: row.get("training_completed"),
                    training_duration_seconds: row.get("training_duration_seconds"),
                    status,
                    error_message: row.get("error_message"),
                    model_metrics: row.get("model_metrics"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SimilarityStore for SqlxStore {
    async fn replace_all(&self, entries: &[UserSimilarity]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        sqlx::query("DELETE FROM user_similarities")
            .execute(&mut *tx)
            .await
            .context("failed to clear user similarities")?;
        for entry in entries {
            sqlx::query(
                r"
                INSERT INTO user_similarities (user_id, similar_users, similarities)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(entry.user_id)
            .bind(&entry.similar_users)
            .bind(&entry.similarities)
            .execute(&mut *tx)
            .await
            .context("failed to insert user similarity")?;
        }
        tx.commit().await.context("failed to commit similarity table")?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<UserSimilarity>> {
        let row = sqlx::query(
            "SELECT user_id, similar_users, similarities FROM user_similarities WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch user similarity")?;

        Ok(row.map(|row| UserSimilarity {
            user_id: row.get("user_id"),
            similar_users: row.get("similar_users"),
            similarities: row.get("similarities"),
        }))
    }
}
