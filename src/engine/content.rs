//! Content-based engine: streaming index training over the full catalog and
//! the two similarity query paths (single anchor and preference profile).
//!
//! Training never holds the full corpus in memory: extractors are fitted on
//! a bounded sample, the catalog is then streamed in fixed-size chunks, and
//! per-language vector buffers are the only state that accumulates. All
//! artifacts are staged and swapped in with atomic renames only after the
//! full build succeeds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use rand::seq::IndexedRandom;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheLayer, cache_key, prefix};
use crate::engine::RecommendationResponse;
use crate::engine::language::LanguageDetector;
use crate::features::{FeaturePipeline, VectorCache};
use crate::index::{AnnIndex, IndexConfig, LanguageIndex, write_atomic};
use crate::store::models::{Action, BookRecord};
use crate::store::traits::{CatalogStore, InteractionStore};

const META_FILE: &str = "book_catalog_meta.json";

/// Dislike profiles nudge the like profile away by this factor.
const DISLIKE_PUSH: f32 = 0.3;

/// Global id/name/language arrays persisted once at the end of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogMeta {
    ids: Vec<Uuid>,
    names: Vec<String>,
    languages: Vec<String>,
}

/// Lookup maps rebuilt from the persisted arrays.
#[derive(Debug, Default)]
struct MetaMaps {
    name_to_id: FxHashMap<String, Uuid>,
    id_language: FxHashMap<Uuid, String>,
    known_ids: FxHashSet<Uuid>,
}

impl MetaMaps {
    fn from_meta(meta: &CatalogMeta) -> Self {
        let mut maps = Self::default();
        for ((id, name), language) in meta.ids.iter().zip(&meta.names).zip(&meta.languages) {
            maps.name_to_id.insert(name.clone(), *id);
            maps.id_language.insert(*id, language.clone());
            maps.known_ids.insert(*id);
        }
        maps
    }
}

pub struct ContentEngineConfig {
    pub model_dir: PathBuf,
    pub fit_sample_size: usize,
    pub chunk_size: usize,
    pub tfidf_max_features: usize,
    pub index: IndexConfig,
    pub alt_anchor_pool: usize,
    pub vector_cache_cap: usize,
    pub vector_cache_evict: usize,
    pub cache_ttl: Duration,
}

#[derive(Default)]
struct ContentState {
    pipeline: Option<FeaturePipeline>,
    maps: Option<MetaMaps>,
    indices: FxHashMap<String, LanguageIndex>,
}

pub struct ContentBasedEngine {
    catalog: Arc<dyn CatalogStore>,
    interactions: Arc<dyn InteractionStore>,
    detector: Arc<LanguageDetector>,
    cache: Arc<dyn CacheLayer>,
    config: ContentEngineConfig,
    state: RwLock<ContentState>,
    vector_cache: Mutex<VectorCache>,
}

impl ContentBasedEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        interactions: Arc<dyn InteractionStore>,
        detector: Arc<LanguageDetector>,
        cache: Arc<dyn CacheLayer>,
        config: ContentEngineConfig,
    ) -> Self {
        let vector_cache = VectorCache::new(config.vector_cache_cap, config.vector_cache_evict);
        Self {
            catalog,
            interactions,
            detector,
            cache,
            config,
            state: RwLock::new(ContentState::default()),
            vector_cache: Mutex::new(vector_cache),
        }
    }

    // ---- training -------------------------------------------------------

    /// Whether persisted artifacts are missing or incomplete.
    fn needs_retrain(&self) -> bool {
        let dir = &self.config.model_dir;
        if !dir.join(META_FILE).exists() {
            return true;
        }
        match FeaturePipeline::load(dir) {
            Ok(Some(_)) => {}
            _ => return true,
        }
        let has_index = std::fs::read_dir(dir).is_ok_and(|entries| {
            entries.flatten().any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("ann_index_")
            })
        });
        !has_index
    }

    /// Train all per-language indices from the full catalog, or reuse
    /// existing artifacts when nothing forces a retrain. Returns whether a
    /// usable model is resident afterwards.
    pub async fn train(&self) -> Result<bool> {
        if !self.needs_retrain() {
            return self.force_reload().await;
        }

        let total = self.catalog.count_eligible().await?;
        if total == 0 {
            info!("no eligible books, content model not built");
            return Ok(false);
        }

        // Stage everything; nothing under model_dir is touched until the
        // whole build has succeeded.
        let staging = self
            .config
            .model_dir
            .join(format!("staging-{}", Uuid::new_v4()));
        let result = self.train_into(&staging, total).await;
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result?;

        self.promote_staging(&staging)?;
        let _ = std::fs::remove_dir_all(&staging);
        self.force_reload().await
    }

    async fn train_into(&self, staging: &Path, total: u64) -> Result<()> {
        std::fs::create_dir_all(staging)
            .with_context(|| format!("failed to create staging dir {}", staging.display()))?;

        // Fit phase: one bounded random sample fits every extractor.
        let sample = self
            .catalog
            .sample_eligible(self.config.fit_sample_size)
            .await
            .context("failed to sample eligible books")?;
        anyhow::ensure!(!sample.is_empty(), "eligible sample came back empty");

        let mut pipeline = FeaturePipeline::default();
        pipeline.fit(&sample, self.config.tfidf_max_features);
        pipeline
            .save(staging)
            .context("failed to persist fitted extractors")?;
        drop(sample);

        // Stream phase: fixed-size chunks, per-language accumulation.
        let mut meta = CatalogMeta::default();
        let mut buffers: FxHashMap<String, (Vec<Array1<f32>>, Vec<Uuid>)> = FxHashMap::default();
        let mut offset = 0u64;
        let mut chunk_num = 0u64;

        while offset < total {
            let chunk = self
                .catalog
                .scan_eligible(offset, self.config.chunk_size)
                .await
                .with_context(|| format!("failed to scan chunk at offset {offset}"))?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            chunk_num += 1;

            let vectors = pipeline.transform_batch(&chunk);
            for (book, vector) in chunk.iter().zip(vectors) {
                let (language_vectors, language_ids) =
                    buffers.entry(book.language.clone()).or_default();
                language_vectors.push(vector);
                language_ids.push(book.id);

                meta.ids.push(book.id);
                meta.names.push(book.name.clone());
                meta.languages.push(book.language.clone());
            }
            info!(chunk = chunk_num, processed = meta.ids.len(), "content chunk processed");
            // Chunk records and their dense vectors drop here; only the
            // per-language buffers keep growing.
        }

        // Finalize phase: one index per language, metadata last.
        for (language, (vectors, ids)) in buffers {
            if vectors.is_empty() {
                continue;
            }
            let matrix = stack_rows(&vectors)?;
            let index = LanguageIndex::new(AnnIndex::build(matrix, self.config.index), ids)?;
            index
                .persist(staging, &language)
                .with_context(|| format!("failed to persist index for {language}"))?;
            info!(language, books = index.len(), "language index built");
        }
        write_atomic(&staging.join(META_FILE), &serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    /// Move every staged artifact into the live model dir. Renames are
    /// per-file atomic, so concurrent readers see either the old or the new
    /// version of each artifact, never a half-written one.
    fn promote_staging(&self, staging: &Path) -> Result<()> {
        for entry in std::fs::read_dir(staging)
            .with_context(|| format!("failed to read staging dir {}", staging.display()))?
        {
            let entry = entry?;
            let target = self.config.model_dir.join(entry.file_name());
            std::fs::rename(entry.path(), &target)
                .with_context(|| format!("failed to promote {}", target.display()))?;
        }
        Ok(())
    }

    // ---- loading --------------------------------------------------------

    /// Drop resident state and reload core artifacts (extractors, metadata,
    /// fallback language index).
    pub async fn force_reload(&self) -> Result<bool> {
        {
            let mut state = self.state.write().await;
            *state = ContentState::default();
        }
        self.ensure_core().await
    }

    async fn ensure_core(&self) -> Result<bool> {
        {
            let state = self.state.read().await;
            if state.pipeline.is_some() && state.maps.is_some() {
                return Ok(true);
            }
        }

        let dir = &self.config.model_dir;
        let Some(pipeline) = FeaturePipeline::load(dir)? else {
            return Ok(false);
        };
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(false);
        }
        let meta: CatalogMeta = serde_json::from_slice(
            &std::fs::read(&meta_path)
                .with_context(|| format!("failed to read {}", meta_path.display()))?,
        )
        .context("malformed catalog metadata")?;

        let mut state = self.state.write().await;
        state.pipeline = Some(pipeline);
        state.maps = Some(MetaMaps::from_meta(&meta));
        drop(state);

        let fallback = self.detector.fallback().to_string();
        self.ensure_languages(&[fallback]).await;
        Ok(true)
    }

    /// Extend the resident language set with any missing index. The set
    /// only grows during a session; a full reload is the only shrink.
    async fn ensure_languages(&self, languages: &[String]) {
        for language in languages {
            {
                let state = self.state.read().await;
                if state.indices.contains_key(language) {
                    continue;
                }
            }
            match LanguageIndex::load(&self.config.model_dir, language) {
                Ok(Some(index)) => {
                    info!(language, books = index.len(), "language index loaded");
                    self.state
                        .write()
                        .await
                        .indices
                        .insert(language.clone(), index);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(language, error = %err, "failed to load language index");
                }
            }
        }
    }

    // ---- vectors --------------------------------------------------------

    /// Transform with the bounded insertion-order cache in front, so one
    /// ranking pass never transforms the same book twice.
    async fn vector_for(&self, pipeline: &FeaturePipeline, book: &BookRecord) -> Array1<f32> {
        {
            let cache = self.vector_cache.lock().await;
            if let Some(vector) = cache.get(&book.id) {
                return vector.clone();
            }
        }
        let vector = pipeline.transform(book);
        self.vector_cache.lock().await.insert(book.id, vector.clone());
        vector
    }

    // ---- query: single anchor -------------------------------------------

    /// Similar books to one anchor from the user's liked history. In
    /// alternative mode the anchor is a random pick among the most recent
    /// likes, excluding the most recent one.
    pub async fn similar_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
        alternative: bool,
    ) -> RecommendationResponse {
        let mode = if alternative { "alt" } else { "anchor" };
        let scope = format!("{}:user:{user_id}", prefix::CONTENT_BASED);
        let key = cache_key(&scope, &[("limit", &limit.to_string()), ("mode", mode)]);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(response) = serde_json::from_value(cached) {
                return response;
            }
        }

        let response = match self.similar_for_user_inner(user_id, limit, alternative).await {
            Ok(response) => response,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "content recommendation failed");
                RecommendationResponse::empty("Content-based recommendations are not available")
            }
        };

        if !response.recommendations.is_empty() {
            if let Ok(value) = serde_json::to_value(&response) {
                let _ = self.cache.set(&key, value, Some(self.config.cache_ttl)).await;
            }
        }
        response
    }

    async fn similar_for_user_inner(
        &self,
        user_id: Uuid,
        limit: usize,
        alternative: bool,
    ) -> Result<RecommendationResponse> {
        if !self.ensure_core().await? {
            return Ok(RecommendationResponse::empty(
                "Content model is not trained yet",
            ));
        }
        let user_languages = self.detector.user_languages(user_id).await;
        self.ensure_languages(&user_languages).await;

        let Some(anchor_name) = self.pick_anchor(user_id, alternative).await? else {
            return Ok(RecommendationResponse::empty(
                "Like some books to get similar recommendations",
            ));
        };
        let Some(anchor) = self.catalog.get_by_name(&anchor_name).await? else {
            return Ok(RecommendationResponse::empty(
                "Your recent liked book is no longer in the catalog",
            ));
        };

        let seen: FxHashSet<String> = self
            .interactions
            .interacted_book_names(user_id)
            .await?
            .into_iter()
            .collect();

        let state = self.state.read().await;
        let (pipeline, maps) = match (&state.pipeline, &state.maps) {
            (Some(pipeline), Some(maps)) => (pipeline, maps),
            _ => {
                return Ok(RecommendationResponse::empty(
                    "Content model is not trained yet",
                ));
            }
        };
        if !maps.known_ids.contains(&anchor.id) {
            return Ok(RecommendationResponse::empty(
                "Your recent liked book is not indexed yet",
            ));
        }

        // The anchor's own language index serves the query; fall back to
        // the default language when it is not resident.
        let anchor_language = maps
            .id_language
            .get(&anchor.id)
            .cloned()
            .unwrap_or_else(|| self.detector.fallback().to_string());
        let index = match state
            .indices
            .get(&anchor_language)
            .or_else(|| state.indices.get(self.detector.fallback()))
        {
            Some(index) => index,
            None => {
                return Ok(RecommendationResponse::empty(
                    "No language index available for your books",
                ));
            }
        };

        let anchor_vector = self.vector_for(pipeline, &anchor).await;
        // Over-fetch so post-filtering the user's history still fills the
        // requested count.
        let k = limit + seen.len() + 1;
        let ranked = index.query(&anchor_vector.view(), k);

        let candidate_ids: Vec<Uuid> = ranked
            .iter()
            .map(|&(id, _)| id)
            .filter(|id| *id != anchor.id)
            .collect();
        let fetched: FxHashMap<Uuid, BookRecord> = self
            .catalog
            .get_by_ids(&candidate_ids)
            .await?
            .into_iter()
            .map(|book| (book.id, book))
            .collect();

        let mut recommendations = Vec::new();
        for (book_id, similarity) in ranked {
            if recommendations.len() >= limit {
                break;
            }
            if book_id == anchor.id {
                continue;
            }
            let Some(book) = fetched.get(&book_id) else {
                continue;
            };
            if seen.contains(&book.name) {
                continue;
            }
            recommendations.push(annotate(
                book,
                similarity,
                "content_based_ann",
                Some(&anchor_name),
            ));
        }

        if recommendations.is_empty() {
            return Ok(RecommendationResponse::empty(
                "No unseen similar books found",
            ));
        }
        let explanation = format!("Because you liked {anchor_name}");
        Ok(RecommendationResponse::new(recommendations, explanation))
    }

    async fn pick_anchor(&self, user_id: Uuid, alternative: bool) -> Result<Option<String>> {
        let pool = if alternative {
            self.config.alt_anchor_pool
        } else {
            1
        };
        let likes = self
            .interactions
            .list_for_user(user_id, Some(Action::Like), pool)
            .await?;
        if likes.is_empty() {
            return Ok(None);
        }
        if !alternative || likes.len() == 1 {
            return Ok(Some(likes[0].book_name.clone()));
        }
        // Alternative mode: random among the recent pool, excluding the
        // most recent like itself.
        let choice = likes[1..]
            .choose(&mut rand::rng())
            .map(|interaction| interaction.book_name.clone());
        Ok(choice)
    }

    // ---- query: preference profile --------------------------------------

    /// Recommendations from the averaged profile of everything the user
    /// liked, nudged away from their dislike profile when one exists.
    pub async fn profile_for_user(&self, user_id: Uuid, limit: usize) -> RecommendationResponse {
        let scope = format!("{}:user:{user_id}", prefix::CONTENT_BASED);
        let key = cache_key(&scope, &[("limit", &limit.to_string()), ("mode", "profile")]);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(response) = serde_json::from_value(cached) {
                return response;
            }
        }

        let response = match self.profile_for_user_inner(user_id, limit).await {
            Ok(response) => response,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "profile recommendation failed");
                RecommendationResponse::empty("Content-based recommendations are not available")
            }
        };

        if !response.recommendations.is_empty() {
            if let Ok(value) = serde_json::to_value(&response) {
                let _ = self.cache.set(&key, value, Some(self.config.cache_ttl)).await;
            }
        }
        response
    }

    async fn profile_for_user_inner(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<RecommendationResponse> {
        if !self.ensure_core().await? {
            return Ok(RecommendationResponse::empty(
                "Content model is not trained yet",
            ));
        }
        let user_languages = self.detector.user_languages(user_id).await;
        self.ensure_languages(&user_languages).await;

        let likes = self
            .interactions
            .list_for_user(user_id, Some(Action::Like), 1000)
            .await?;
        if likes.is_empty() {
            return Ok(RecommendationResponse::empty(
                "No liked books found to analyze",
            ));
        }
        let dislikes = self
            .interactions
            .list_for_user(user_id, Some(Action::Dislike), 1000)
            .await?;

        let seen: FxHashSet<String> = self
            .interactions
            .interacted_book_names(user_id)
            .await?
            .into_iter()
            .collect();

        let state = self.state.read().await;
        let (pipeline, maps) = match (&state.pipeline, &state.maps) {
            (Some(pipeline), Some(maps)) => (pipeline, maps),
            _ => {
                return Ok(RecommendationResponse::empty(
                    "Content model is not trained yet",
                ));
            }
        };

        let liked_ids: Vec<Uuid> = likes
            .iter()
            .filter_map(|i| maps.name_to_id.get(&i.book_name).copied())
            .collect();
        if liked_ids.is_empty() {
            return Ok(RecommendationResponse::empty(
                "No liked books found in the content model",
            ));
        }
        let liked_books = self.catalog.get_by_ids(&liked_ids).await?;
        let mut like_profile = Array1::<f32>::zeros(crate::features::VECTOR_DIM);
        for book in &liked_books {
            like_profile += &self.vector_for(pipeline, book).await;
        }
        like_profile /= liked_books.len() as f32;
        normalize_in_place(&mut like_profile);

        let disliked_ids: Vec<Uuid> = dislikes
            .iter()
            .filter_map(|i| maps.name_to_id.get(&i.book_name).copied())
            .collect();
        if !disliked_ids.is_empty() {
            let disliked_books = self.catalog.get_by_ids(&disliked_ids).await?;
            if !disliked_books.is_empty() {
                let mut dislike_profile = Array1::<f32>::zeros(crate::features::VECTOR_DIM);
                for book in &disliked_books {
                    dislike_profile += &self.vector_for(pipeline, book).await;
                }
                dislike_profile /= disliked_books.len() as f32;
                normalize_in_place(&mut dislike_profile);

                // profile += push · (like − dislike), then renormalize.
                let difference = &like_profile - &dislike_profile;
                like_profile = &like_profile + &(difference * DISLIKE_PUSH);
                normalize_in_place(&mut like_profile);
            }
        }

        // Search every resident language for this user and merge.
        let mut candidates: Vec<(Uuid, f32)> = Vec::new();
        for language in &user_languages {
            let Some(index) = state.indices.get(language) else {
                continue;
            };
            let k = (limit * 3).min(index.len());
            for (book_id, score) in index.query(&like_profile.view(), k) {
                if !liked_ids.contains(&book_id) {
                    candidates.push((book_id, score));
                }
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(limit * 2);

        let candidate_ids: Vec<Uuid> = candidates.iter().map(|&(id, _)| id).collect();
        let fetched: FxHashMap<Uuid, BookRecord> = self
            .catalog
            .get_by_ids(&candidate_ids)
            .await?
            .into_iter()
            .map(|book| (book.id, book))
            .collect();

        let mut recommendations = Vec::new();
        let mut picked: FxHashSet<Uuid> = FxHashSet::default();
        for (book_id, similarity) in candidates {
            if recommendations.len() >= limit {
                break;
            }
            let Some(book) = fetched.get(&book_id) else {
                continue;
            };
            if seen.contains(&book.name) || !picked.insert(book_id) {
                continue;
            }
            recommendations.push(annotate(book, similarity, "content_based_profile", None));
        }

        let mut explanation = format!(
            "Based on content analysis of {} books you liked",
            liked_books.len()
        );
        if !dislikes.is_empty() {
            explanation.push_str(&format!(" and {} books you disliked", dislikes.len()));
        }
        Ok(RecommendationResponse::new(recommendations, explanation))
    }
}

fn annotate(
    book: &BookRecord,
    similarity: f32,
    algorithm: &str,
    based_on: Option<&str>,
) -> serde_json::Value {
    let mut value = book.to_summary_json();
    if let Some(object) = value.as_object_mut() {
        object.insert("similarity_score".into(), serde_json::json!(similarity));
        object.insert(
            "recommendation_score".into(),
            serde_json::json!(similarity * 100.0),
        );
        object.insert("confidence".into(), serde_json::json!(similarity.min(1.0)));
        object.insert("algorithm".into(), serde_json::json!(algorithm));
        if let Some(anchor) = based_on {
            object.insert("based_on_book".into(), serde_json::json!(anchor));
        }
    }
    value
}

fn normalize_in_place(vector: &mut Array1<f32>) {
    let norm = vector.dot(vector).sqrt();
    if norm > 0.0 {
        *vector /= norm;
    }
}

fn stack_rows(rows: &[Array1<f32>]) -> Result<Array2<f32>> {
    anyhow::ensure!(!rows.is_empty(), "cannot stack zero rows");
    let dim = rows[0].len();
    let mut matrix = Array2::<f32>::zeros((rows.len(), dim));
    for (i, row) in rows.iter().enumerate() {
        matrix.row_mut(i).assign(row);
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;
    use crate::store::models::Interaction;
    use chrono::Utc;

    fn book(name: &str, summary: &str, genres: &[&str], author: &str) -> BookRecord {
        BookRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            author: author.to_string(),
            genres: genres.iter().map(ToString::to_string).collect(),
            summary: summary.to_string(),
            year: 2000,
            language: "english".to_string(),
            star_rating: Some(4.0),
            num_ratings: 50,
            popularity_score: 1.0,
        }
    }

    fn interaction(user: Uuid, name: &str, action: Action) -> Interaction {
        Interaction {
            user_id: user,
            book_name: name.to_string(),
            book_author: "A".to_string(),
            action,
            timestamp: Utc::now(),
            book_genres: vec![],
        }
    }

    fn engine_over(store: Arc<MemoryStore>, dir: &Path) -> ContentBasedEngine {
        let detector = Arc::new(LanguageDetector::new(
            store.clone(),
            store.clone(),
            store.clone(),
            "english",
            3,
            2,
        ));
        ContentBasedEngine::new(
            store.clone(),
            store,
            detector,
            Arc::new(MemoryCache::new()),
            ContentEngineConfig {
                model_dir: dir.to_path_buf(),
                fit_sample_size: 100,
                chunk_size: 2,
                tfidf_max_features: 1000,
                index: IndexConfig::default(),
                alt_anchor_pool: 20,
                vector_cache_cap: 1000,
                vector_cache_evict: 100,
                cache_ttl: Duration::from_secs(60),
            },
        )
    }

    async fn seed_catalog(store: &MemoryStore) {
        store
            .add_book(book(
                "Dragonflight",
                "dragon riders bond with telepathic dragons to defend their world",
                &["Fantasy"],
                "Anne McCaffrey",
            ))
            .await;
        store
            .add_book(book(
                "Dragonquest",
                "the dragon riders return as threads fall again on the world",
                &["Fantasy"],
                "Anne McCaffrey",
            ))
            .await;
        store
            .add_book(book(
                "The Maltese Falcon",
                "a private detective untangles lies around a priceless statuette",
                &["Mystery"],
                "Dashiell Hammett",
            ))
            .await;
        store
            .add_book(book(
                "The Big Sleep",
                "a detective wades through blackmail and murder in los angeles",
                &["Mystery"],
                "Raymond Chandler",
            ))
            .await;
    }

    #[tokio::test]
    async fn training_builds_and_reloads_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        seed_catalog(&store).await;

        let engine = engine_over(store, dir.path());
        assert!(engine.needs_retrain());
        assert!(engine.train().await.unwrap());
        assert!(!engine.needs_retrain());

        // Reuse path: second train call loads instead of rebuilding.
        assert!(engine.train().await.unwrap());
    }

    #[tokio::test]
    async fn empty_catalog_does_not_build() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        let engine = engine_over(store, dir.path());
        assert!(!engine.train().await.unwrap());
    }

    #[tokio::test]
    async fn anchor_query_returns_similar_unseen_books() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        seed_catalog(&store).await;
        let user = Uuid::new_v4();
        store
            .upsert(&interaction(user, "Dragonflight", Action::Like))
            .await
            .unwrap();

        let engine = engine_over(store, dir.path());
        engine.train().await.unwrap();

        let response = engine.similar_for_user(user, 2, false).await;
        assert!(response.count >= 1);
        let names: Vec<&str> = response
            .recommendations
            .iter()
            .map(|r| r.get("name").and_then(|n| n.as_str()).unwrap())
            .collect();
        // The anchor itself is excluded, its sequel ranks first.
        assert!(!names.contains(&"Dragonflight"));
        assert_eq!(names[0], "Dragonquest");
        let first = &response.recommendations[0];
        assert_eq!(first.get("algorithm").unwrap(), "content_based_ann");
        assert!(first.get("confidence").unwrap().as_f64().unwrap() <= 1.0);
    }

    #[tokio::test]
    async fn no_likes_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        seed_catalog(&store).await;
        let engine = engine_over(store, dir.path());
        engine.train().await.unwrap();

        let response = engine.similar_for_user(Uuid::new_v4(), 3, false).await;
        assert_eq!(response.count, 0);
        assert!(!response.explanation.is_empty());
    }

    #[tokio::test]
    async fn untrained_model_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        let engine = engine_over(store, dir.path());
        let response = engine.similar_for_user(Uuid::new_v4(), 3, false).await;
        assert_eq!(response.count, 0);
    }

    #[tokio::test]
    async fn profile_query_excludes_interacted_books() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(10));
        seed_catalog(&store).await;
        let user = Uuid::new_v4();
        store
            .upsert(&interaction(user, "The Maltese Falcon", Action::Like))
            .await
            .unwrap();
        store
            .upsert(&interaction(user, "Dragonflight", Action::Dislike))
            .await
            .unwrap();

        let engine = engine_over(store, dir.path());
        engine.train().await.unwrap();

        let response = engine.profile_for_user(user, 3).await;
        let names: Vec<&str> = response
            .recommendations
            .iter()
            .map(|r| r.get("name").and_then(|n| n.as_str()).unwrap())
            .collect();
        assert!(!names.contains(&"The Maltese Falcon"));
        assert!(!names.contains(&"Dragonflight"));
        assert!(names.contains(&"The Big Sleep"));
        assert!(response.explanation.contains("1 books you liked"));
        assert!(response.explanation.contains("1 books you disliked"));
    }
}
