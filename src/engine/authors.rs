//! Per-user author affinity: a descending-sorted preference list with O(1)
//! most-preferred-author reads and exact inverse removal.

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::store::models::{Action, AuthorPreference};
use crate::store::traits::InteractionStore;

pub struct AuthorAffinityStore {
    store: Arc<dyn InteractionStore>,
}

impl AuthorAffinityStore {
    #[must_use]
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self { store }
    }

    /// Apply a like (+1) or dislike (-1) contribution for one author.
    ///
    /// An author entry is created on the first positive contribution,
    /// removed when its count reaches zero, and the list is re-sorted after
    /// every mutation. The per-user list stays small (dozens of authors), so
    /// a full re-sort is the whole maintenance cost.
    pub async fn update(
        &self,
        user_id: Uuid,
        author: &str,
        action: Action,
        book_name: &str,
    ) -> Result<()> {
        let author = author.trim();
        if author.is_empty() {
            return Ok(());
        }
        let weight: i64 = match action {
            Action::Like => 1,
            Action::Dislike => -1,
        };

        let mut prefs = self
            .store
            .load_author_prefs(user_id)
            .await
            .context("failed to load author preferences")?;

        if let Some(pos) = prefs.iter().position(|p| p.author_name == author) {
            let entry = &mut prefs[pos];
            entry.preference_count = (entry.preference_count + weight).max(0);
            entry.total_interactions += 1;
            let books = match action {
                Action::Like => &mut entry.books_liked,
                Action::Dislike => &mut entry.books_disliked,
            };
            if !books.iter().any(|b| b == book_name) {
                books.push(book_name.to_string());
            }
            if entry.preference_count <= 0 {
                prefs.remove(pos);
            }
        } else if weight > 0 {
            prefs.push(AuthorPreference {
                author_name: author.to_string(),
                preference_count: weight,
                books_liked: vec![book_name.to_string()],
                books_disliked: Vec::new(),
                total_interactions: 1,
            });
        }

        sort_descending(&mut prefs);
        self.store
            .save_author_prefs(user_id, &prefs)
            .await
            .context("failed to save author preferences")
    }

    /// Most-preferred author: the first element of the sorted list.
    pub async fn top(&self, user_id: Uuid) -> Result<Option<AuthorPreference>> {
        let prefs = self
            .store
            .load_author_prefs(user_id)
            .await
            .context("failed to load author preferences")?;
        Ok(prefs.into_iter().next())
    }

    /// Exact inverse of a prior `update`: removes the book from the
    /// matching membership set and reverses the count contribution. Used
    /// when an interaction is overwritten or deleted.
    pub async fn remove(
        &self,
        user_id: Uuid,
        author: &str,
        action: Action,
        book_name: &str,
    ) -> Result<()> {
        let author = author.trim();
        if author.is_empty() {
            return Ok(());
        }
        let weight: i64 = match action {
            Action::Like => -1,
            Action::Dislike => 1,
        };

        let mut prefs = self
            .store
            .load_author_prefs(user_id)
            .await
            .context("failed to load author preferences")?;

        if let Some(pos) = prefs.iter().position(|p| p.author_name == author) {
            let entry = &mut prefs[pos];
            let books = match action {
                Action::Like => &mut entry.books_liked,
                Action::Dislike => &mut entry.books_disliked,
            };
            books.retain(|b| b != book_name);
            entry.preference_count += weight;
            entry.total_interactions -= 1;
            if entry.preference_count <= 0 {
                prefs.remove(pos);
            }
        }

        sort_descending(&mut prefs);
        self.store
            .save_author_prefs(user_id, &prefs)
            .await
            .context("failed to save author preferences")
    }
}

fn sort_descending(prefs: &mut [AuthorPreference]) {
    prefs.sort_by(|a, b| b.preference_count.cmp(&a.preference_count));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn affinity() -> (AuthorAffinityStore, Uuid) {
        let store = Arc::new(MemoryStore::new(10));
        (AuthorAffinityStore::new(store), Uuid::new_v4())
    }

    #[tokio::test]
    async fn like_creates_entry_and_top_reads_it() {
        let (affinity, user) = affinity();
        affinity.update(user, "X", Action::Like, "A").await.unwrap();

        let top = affinity.top(user).await.unwrap().expect("top author");
        assert_eq!(top.author_name, "X");
        assert_eq!(top.preference_count, 1);
        assert_eq!(top.books_liked, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn dislike_on_unknown_author_creates_nothing() {
        let (affinity, user) = affinity();
        affinity.update(user, "X", Action::Dislike, "A").await.unwrap();
        assert!(affinity.top(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn like_then_dislike_restores_pre_like_state() {
        let (affinity, user) = affinity();
        affinity.update(user, "X", Action::Like, "A").await.unwrap();
        // Overwrite: undo the like, then apply the dislike.
        affinity.remove(user, "X", Action::Like, "A").await.unwrap();
        affinity.update(user, "X", Action::Dislike, "A").await.unwrap();

        assert!(affinity.top(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn top_is_always_the_max_count() {
        let (affinity, user) = affinity();
        for book in ["A", "B", "C"] {
            affinity.update(user, "X", Action::Like, book).await.unwrap();
        }
        for book in ["D", "E"] {
            affinity.update(user, "Y", Action::Like, book).await.unwrap();
        }
        let top = affinity.top(user).await.unwrap().expect("top author");
        assert_eq!(top.author_name, "X");
        assert_eq!(top.preference_count, 3);

        // Y overtakes X after two more likes.
        for book in ["F", "G"] {
            affinity.update(user, "Y", Action::Like, book).await.unwrap();
        }
        let top = affinity.top(user).await.unwrap().expect("top author");
        assert_eq!(top.author_name, "Y");
        assert_eq!(top.preference_count, 4);
    }

    #[tokio::test]
    async fn empty_author_is_a_no_op() {
        let (affinity, user) = affinity();
        affinity.update(user, "  ", Action::Like, "A").await.unwrap();
        assert!(affinity.top(user).await.unwrap().is_none());
    }
}
