//! Shared data model for the catalog, interaction, and counter stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A catalog book as the recommender sees it. Owned by the catalog store;
/// immutable from this side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: Uuid,
    pub name: String,
    pub author: String,
    pub genres: Vec<String>,
    pub summary: String,
    pub year: i32,
    pub language: String,
    pub star_rating: Option<f32>,
    pub num_ratings: i64,
    pub popularity_score: f64,
}

impl BookRecord {
    /// 推薦応答に載せる最小限の表現。
    #[must_use]
    pub fn to_summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "author": self.author,
            "genres": self.genres,
            "language": self.language,
            "star_rating": self.star_rating,
            "num_ratings": self.num_ratings,
        })
    }
}

/// Like/dislike action on a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            other => Err(anyhow::anyhow!("unknown action: {other}")),
        }
    }
}

/// One interaction row. At most one per (user, book); a later action
/// overwrites the former in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: Uuid,
    pub book_name: String,
    pub book_author: String,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the book's genres at interaction time.
    pub book_genres: Vec<String>,
}

/// Per-user author preference entry. The per-user list is kept sorted
/// descending by `preference_count`; an entry is removed once the count
/// reaches zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorPreference {
    pub author_name: String,
    pub preference_count: i64,
    pub books_liked: Vec<String>,
    pub books_disliked: Vec<String>,
    pub total_interactions: i64,
}

/// Per-user genre tally for one action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenrePreference {
    pub genre: String,
    pub count: i64,
}

/// Shared interaction counter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub current_count: i64,
    pub threshold: i64,
    pub total_retrainings: i64,
    pub last_updated: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
}

/// Outcome of one training attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    InProgress,
    Success,
    Failed,
    Timeout,
    Error,
}

impl TrainingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Append-only training history entry. Once the status leaves
/// `InProgress`, completion fields are filled exactly once and the row is
/// never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: Uuid,
    pub trigger_count: i64,
    pub training_started: DateTime<Utc>,
    pub training_completed: Option<DateTime<Utc>>,
    pub training_duration_seconds: Option<f64>,
    pub status: TrainingStatus,
    pub error_message: Option<String>,
    pub model_metrics: serde_json::Value,
}

/// Precomputed similar-user entry for one target user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSimilarity {
    pub user_id: Uuid,
    pub similar_users: Vec<Uuid>,
    pub similarities: Vec<f32>,
}
