//! User language detection and tolerant language matching.
//!
//! Detection prefers the user's declared profile languages and falls back
//! to the histogram of their liked books' languages. Matching tolerates
//! locale variants and synonyms ("en" ≈ "english" ≈ "en-us") via a fixed
//! table plus substring containment.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;
use uuid::Uuid;

use crate::store::models::Action;
use crate::store::traits::{CatalogStore, InteractionStore, UserProfileStore};

/// Fixed synonym groups for common language variants.
const LANGUAGE_SYNONYMS: &[(&str, &[&str])] = &[
    ("english", &["en", "eng", "en-us", "en-gb"]),
    ("spanish", &["es", "esp", "español", "castellano", "es-es", "es-mx"]),
    ("french", &["fr", "français", "francais", "fr-fr"]),
    ("german", &["de", "deutsch", "de-de"]),
    ("italian", &["it", "italiano", "it-it"]),
    ("portuguese", &["pt", "português", "portugues", "pt-br", "pt-pt"]),
    ("chinese", &["zh", "mandarin", "zh-cn", "zh-tw"]),
    ("japanese", &["ja", "jp", "ja-jp"]),
    ("korean", &["ko", "kr", "ko-kr"]),
    ("russian", &["ru", "русский", "ru-ru"]),
    ("arabic", &["ar", "العربية", "ar-sa", "عربي", "عربية"]),
    ("hindi", &["hi", "हिन्दी", "hi-in"]),
];

/// Check whether a book's language satisfies a user's language preference.
#[must_use]
pub fn languages_match(book_language: &str, user_language: &str) -> bool {
    let book = book_language.trim().to_lowercase();
    let user = user_language.trim().to_lowercase();

    if book == user {
        return true;
    }
    // Locale variants usually contain the other tag as a substring.
    if !book.is_empty() && !user.is_empty() && (book.contains(&user) || user.contains(&book)) {
        return true;
    }
    for (main, alternatives) in LANGUAGE_SYNONYMS {
        let book_in_group = book == *main || alternatives.contains(&book.as_str());
        let user_in_group = user == *main || alternatives.contains(&user.as_str());
        if book_in_group && user_in_group {
            return true;
        }
    }
    false
}

/// Whether a book passes the language-membership check for a user.
/// No preferences or an unknown book language always passes.
#[must_use]
pub fn meets_language_requirement(book_language: Option<&str>, user_languages: &[String]) -> bool {
    if user_languages.is_empty() {
        return true;
    }
    let Some(book_language) = book_language else {
        return true;
    };
    user_languages
        .iter()
        .any(|user_language| languages_match(book_language, user_language))
}

pub struct LanguageDetector {
    profiles: Arc<dyn UserProfileStore>,
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    fallback: String,
    max_languages: usize,
    min_count: usize,
}

impl LanguageDetector {
    #[must_use]
    pub fn new(
        profiles: Arc<dyn UserProfileStore>,
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        fallback: impl Into<String>,
        max_languages: usize,
        min_count: usize,
    ) -> Self {
        Self {
            profiles,
            interactions,
            catalog,
            fallback: fallback.into(),
            max_languages,
            min_count,
        }
    }

    #[must_use]
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Detected languages for a user, most significant first, always
    /// including the fallback language. Detection errors degrade to the
    /// fallback alone.
    pub async fn user_languages(&self, user_id: Uuid) -> Vec<String> {
        match self.detect(user_id).await {
            Ok(languages) => languages,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "language detection failed, using fallback");
                vec![self.fallback.clone()]
            }
        }
    }

    async fn detect(&self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        // Declared profile languages win outright.
        let profile_languages = self.profiles.languages(user_id).await?;
        let cleaned: Vec<String> = profile_languages
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .take(self.max_languages)
            .collect();
        if !cleaned.is_empty() {
            return Ok(dedup_keep_order(cleaned));
        }

        // Otherwise: histogram of liked-book languages.
        let likes = self
            .interactions
            .list_for_user(user_id, Some(Action::Like), 1000)
            .await?;
        if likes.is_empty() {
            return Ok(vec![self.fallback.clone()]);
        }

        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for interaction in &likes {
            let language = self
                .catalog
                .language_of(&interaction.book_name)
                .await?
                .unwrap_or_else(|| self.fallback.clone());
            *counts.entry(language.trim().to_lowercase()).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_count)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut languages: Vec<String> = ranked
            .into_iter()
            .take(self.max_languages)
            .map(|(language, _)| language)
            .collect();
        if !languages.iter().any(|l| *l == self.fallback) {
            languages.push(self.fallback.clone());
        }
        Ok(dedup_keep_order(languages))
    }
}

fn dedup_keep_order(languages: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for language in languages {
        if !seen.contains(&language) {
            seen.push(language);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::models::{BookRecord, Interaction};
    use chrono::Utc;

    use rstest::rstest;

    #[rstest]
    #[case("english", "english")]
    #[case("en", "english")]
    #[case("en-us", "english")]
    #[case("en-us", "en")]
    #[case("português", "pt-br")]
    #[case("ESPAÑOL", "es-mx")]
    fn languages_that_should_match(#[case] book: &str, #[case] user: &str) {
        assert!(languages_match(book, user));
    }

    #[rstest]
    #[case("japanese", "english")]
    #[case("korean", "chinese")]
    #[case("", "english")]
    fn languages_that_should_not_match(#[case] book: &str, #[case] user: &str) {
        assert!(!languages_match(book, user));
    }

    #[test]
    fn requirement_passes_without_preferences_or_language() {
        assert!(meets_language_requirement(Some("japanese"), &[]));
        assert!(meets_language_requirement(None, &["english".to_string()]));
        assert!(!meets_language_requirement(
            Some("japanese"),
            &["english".to_string()]
        ));
    }

    fn book(name: &str, language: &str) -> BookRecord {
        BookRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            author: "A".to_string(),
            genres: vec![],
            summary: "s".to_string(),
            year: 2000,
            language: language.to_string(),
            star_rating: None,
            num_ratings: 0,
            popularity_score: 0.0,
        }
    }

    fn like(user: Uuid, name: &str) -> Interaction {
        Interaction {
            user_id: user,
            book_name: name.to_string(),
            book_author: "A".to_string(),
            action: Action::Like,
            timestamp: Utc::now(),
            book_genres: vec![],
        }
    }

    #[tokio::test]
    async fn profile_languages_take_priority() {
        let store = Arc::new(MemoryStore::new(10));
        let user = Uuid::new_v4();
        store.add_language(user, "Arabic").await.unwrap();
        let detector = LanguageDetector::new(
            store.clone(),
            store.clone(),
            store,
            "english",
            3,
            2,
        );
        assert_eq!(detector.user_languages(user).await, vec!["arabic".to_string()]);
    }

    #[tokio::test]
    async fn history_histogram_includes_fallback() {
        let store = Arc::new(MemoryStore::new(10));
        let user = Uuid::new_v4();
        for i in 0..3 {
            let name = format!("fr{i}");
            store.add_book(book(&name, "french")).await;
            store.upsert(&like(user, &name)).await.unwrap();
        }
        let detector = LanguageDetector::new(
            store.clone(),
            store.clone(),
            store,
            "english",
            3,
            2,
        );
        let languages = detector.user_languages(user).await;
        assert_eq!(languages, vec!["french".to_string(), "english".to_string()]);
    }

    #[tokio::test]
    async fn no_interactions_means_fallback_only() {
        let store = Arc::new(MemoryStore::new(10));
        let detector = LanguageDetector::new(
            store.clone(),
            store.clone(),
            store,
            "english",
            3,
            2,
        );
        assert_eq!(
            detector.user_languages(Uuid::new_v4()).await,
            vec!["english".to_string()]
        );
    }
}
