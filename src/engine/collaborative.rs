//! Collaborative-filtering engine: user-item matrix build, ALS training
//! artifacts, the precomputed user-similarity table, and the multi-user
//! cascade recommender with a synchronous cold-start retrain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheLayer, cache_key, prefix};
use crate::engine::RecommendationResponse;
use crate::engine::als::AlsModel;
use crate::engine::language::{LanguageDetector, meets_language_requirement};
use crate::index::write_atomic;
use crate::store::models::{Action, BookRecord, Interaction, UserSimilarity};
use crate::store::traits::{CatalogStore, InteractionStore, SimilarityStore};
use crate::trainer::task::TrainingTask;

const MODEL_FILE: &str = "als_model.json";
const MAPPINGS_FILE: &str = "als_mappings.json";

/// Per-similar-user like fetch bound during the cascade walk.
const LIKES_PER_SIMILAR_USER: usize = 100;

/// Stable user/item index mappings persisted alongside the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mappings {
    pub users: Vec<Uuid>,
    pub items: Vec<String>,
    #[serde(skip)]
    user_index: FxHashMap<Uuid, usize>,
    #[serde(skip)]
    item_index: FxHashMap<String, usize>,
}

impl Mappings {
    #[must_use]
    pub fn new(users: Vec<Uuid>, items: Vec<String>) -> Self {
        let mut mappings = Self {
            users,
            items,
            user_index: FxHashMap::default(),
            item_index: FxHashMap::default(),
        };
        mappings.rebuild();
        mappings
    }

    fn rebuild(&mut self) {
        self.user_index = self
            .users
            .iter()
            .enumerate()
            .map(|(idx, user)| (*user, idx))
            .collect();
        self.item_index = self
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.clone(), idx))
            .collect();
    }

    #[must_use]
    pub fn user_index(&self, user: &Uuid) -> Option<usize> {
        self.user_index.get(user).copied()
    }

    #[must_use]
    pub fn item_index(&self, item: &str) -> Option<usize> {
        self.item_index.get(item).copied()
    }
}

/// Build the sparse user×item weight matrix from all interactions. Likes
/// dominate; dislikes stay weakly present instead of being erased.
/// Duplicate (user, item) pairs aggregate by summing.
#[must_use]
pub fn build_interaction_matrix(
    interactions: &[Interaction],
    like_weight: f32,
    dislike_weight: f32,
) -> Option<(CsMat<f32>, Mappings)> {
    if interactions.is_empty() {
        return None;
    }

    let mut users: Vec<Uuid> = Vec::new();
    let mut items: Vec<String> = Vec::new();
    let mut user_index: FxHashMap<Uuid, usize> = FxHashMap::default();
    let mut item_index: FxHashMap<String, usize> = FxHashMap::default();
    let mut weights: FxHashMap<(usize, usize), f32> = FxHashMap::default();

    for interaction in interactions {
        let u = *user_index.entry(interaction.user_id).or_insert_with(|| {
            users.push(interaction.user_id);
            users.len() - 1
        });
        let i = *item_index
            .entry(interaction.book_name.clone())
            .or_insert_with(|| {
                items.push(interaction.book_name.clone());
                items.len() - 1
            });
        let weight = match interaction.action {
            Action::Like => like_weight,
            Action::Dislike => dislike_weight,
        };
        *weights.entry((u, i)).or_insert(0.0) += weight;
    }

    let mut tri = TriMat::new((users.len(), items.len()));
    for ((u, i), weight) in weights {
        tri.add_triplet(u, i, weight);
    }
    Some((tri.to_csr(), Mappings::new(users, items)))
}

/// Top-K most-similar users by cosine similarity of latent factors, for
/// every registered user present in the mapping.
#[must_use]
pub fn compute_similarity_table(
    model: &AlsModel,
    mappings: &Mappings,
    registered_users: &[Uuid],
    top_k: usize,
) -> Vec<UserSimilarity> {
    registered_users
        .iter()
        .filter_map(|user| {
            let user_idx = mappings.user_index(user)?;
            let mut scored: Vec<(usize, f32)> = (0..mappings.users.len())
                .filter(|&other| other != user_idx)
                .map(|other| (other, model.user_cosine_similarity(user_idx, other)))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            scored.truncate(top_k);
            Some(UserSimilarity {
                user_id: *user,
                similar_users: scored.iter().map(|&(idx, _)| mappings.users[idx]).collect(),
                similarities: scored.iter().map(|&(_, score)| score).collect(),
            })
        })
        .collect()
}

/// Persist model and mappings with write-then-rename.
pub fn save_model(dir: &Path, model: &AlsModel, mappings: &Mappings) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create model dir {}", dir.display()))?;
    write_atomic(&dir.join(MAPPINGS_FILE), &serde_json::to_vec(mappings)?)?;
    write_atomic(&dir.join(MODEL_FILE), &serde_json::to_vec(model)?)?;
    Ok(())
}

/// Load persisted model and mappings; `None` when artifacts are absent.
pub fn load_model(dir: &Path) -> Result<Option<(AlsModel, Mappings)>> {
    let model_path = dir.join(MODEL_FILE);
    let mappings_path = dir.join(MAPPINGS_FILE);
    if !model_path.exists() || !mappings_path.exists() {
        return Ok(None);
    }
    let model: AlsModel = serde_json::from_slice(
        &std::fs::read(&model_path)
            .with_context(|| format!("failed to read {}", model_path.display()))?,
    )
    .context("malformed ALS model artifact")?;
    let mut mappings: Mappings = serde_json::from_slice(
        &std::fs::read(&mappings_path)
            .with_context(|| format!("failed to read {}", mappings_path.display()))?,
    )
    .context("malformed ALS mappings artifact")?;
    mappings.rebuild();
    Ok(Some((model, mappings)))
}

pub struct CollaborativeEngineConfig {
    pub model_dir: PathBuf,
    pub similarity_floor: f32,
    pub training_timeout: Duration,
    pub cache_ttl: Duration,
}

struct LoadedModel {
    #[allow(dead_code)]
    model: AlsModel,
    mappings: Mappings,
}

pub struct CollaborativeEngine {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    similarities: Arc<dyn SimilarityStore>,
    detector: Arc<LanguageDetector>,
    cache: Arc<dyn CacheLayer>,
    trainer: Arc<dyn TrainingTask>,
    config: CollaborativeEngineConfig,
    state: RwLock<Option<LoadedModel>>,
}

impl CollaborativeEngine {
    #[must_use]
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        similarities: Arc<dyn SimilarityStore>,
        detector: Arc<LanguageDetector>,
        cache: Arc<dyn CacheLayer>,
        trainer: Arc<dyn TrainingTask>,
        config: CollaborativeEngineConfig,
    ) -> Self {
        Self {
            interactions,
            catalog,
            similarities,
            detector,
            cache,
            trainer,
            config,
            state: RwLock::new(None),
        }
    }

    /// Drop the in-memory model and reload the freshly persisted artifacts.
    /// Called after every successful background training run.
    pub async fn force_reload(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        *state = None;
        match load_model(&self.config.model_dir)? {
            Some((model, mappings)) => {
                info!(
                    users = mappings.users.len(),
                    items = mappings.items.len(),
                    "collaborative model reloaded"
                );
                *state = Some(LoadedModel { model, mappings });
                Ok(true)
            }
            None => {
                warn!("no persisted collaborative model to reload");
                Ok(false)
            }
        }
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.state.read().await.is_some() {
            return Ok(());
        }
        self.force_reload().await?;
        Ok(())
    }

    async fn user_in_mapping(&self, user_id: Uuid) -> bool {
        let state = self.state.read().await;
        state
            .as_ref()
            .is_some_and(|loaded| loaded.mappings.user_index(&user_id).is_some())
    }

    /// Synchronous cold-start retrain for a user missing from the trained
    /// mapping: one full external training run, then a reload. Users with
    /// zero interactions are not worth a run.
    async fn retrain_for_new_user(&self, user_id: Uuid) -> Result<bool> {
        let interaction_count = self.interactions.count_for_user(user_id).await?;
        if interaction_count == 0 {
            return Ok(false);
        }

        info!(user_id = %user_id, "running cold-start retrain");
        let output =
            tokio::time::timeout(self.config.training_timeout, self.trainer.run())
                .await
                .context("cold-start retrain timed out")?
                .context("cold-start retrain failed to run")?;
        if !output.success {
            warn!(user_id = %user_id, stderr = %output.stderr, "cold-start retrain failed");
            return Ok(false);
        }
        self.force_reload().await
    }

    /// Enhanced cascade recommendation: walk precomputed similar users in
    /// similarity order and pull their liked books until the quota is met.
    pub async fn recommend(&self, user_id: Uuid, limit: usize) -> RecommendationResponse {
        let scope = format!("{}:user:{user_id}", prefix::COLLABORATIVE);
        let key = cache_key(&scope, &[("limit", &limit.to_string())]);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(response) = serde_json::from_value(cached) {
                return response;
            }
        }

        let response = match self.cascade(user_id, limit).await {
            Ok(response) => response,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "collaborative recommendation failed");
                RecommendationResponse::empty("Collaborative recommendations are not available")
            }
        };

        if !response.recommendations.is_empty() {
            if let Ok(value) = serde_json::to_value(&response) {
                if let Err(err) = self
                    .cache
                    .set(&key, value, Some(self.config.cache_ttl))
                    .await
                {
                    warn!(error = %err, "failed to cache collaborative response");
                }
            }
        }
        response
    }

    async fn cascade(&self, user_id: Uuid, limit: usize) -> Result<RecommendationResponse> {
        self.ensure_loaded().await?;

        if !self.user_in_mapping(user_id).await {
            let retrained = self.retrain_for_new_user(user_id).await?;
            if !retrained || !self.user_in_mapping(user_id).await {
                return Ok(RecommendationResponse::empty(
                    "Interact with some books to get collaborative recommendations",
                ));
            }
        }

        let Some(similar) = self.similarities.get(user_id).await? else {
            return Ok(RecommendationResponse::empty(
                "No similar readers found yet",
            ));
        };

        // Keep only users above the similarity floor, already in
        // similarity-descending order from the trained table.
        let sorted_user_ids: Vec<Uuid> = similar
            .similar_users
            .iter()
            .zip(&similar.similarities)
            .filter(|&(_, &score)| score >= self.config.similarity_floor)
            .map(|(uid, _)| *uid)
            .collect();

        let seen: Vec<String> = self.interactions.interacted_book_names(user_id).await?;
        let user_languages = self.detector.user_languages(user_id).await;

        let mut recommendations: Vec<serde_json::Value> = Vec::new();
        let mut picked_names: Vec<String> = Vec::new();
        let mut book_info_cache: FxHashMap<String, Option<BookRecord>> = FxHashMap::default();

        for similar_user_id in sorted_user_ids {
            if recommendations.len() >= limit {
                break;
            }

            let their_likes = self
                .interactions
                .list_for_user(similar_user_id, Some(Action::Like), LIKES_PER_SIMILAR_USER)
                .await?;

            let mut liked_books: Vec<BookRecord> = Vec::new();
            for like in &their_likes {
                if seen.contains(&like.book_name) || picked_names.contains(&like.book_name) {
                    continue;
                }
                let info = match book_info_cache.get(&like.book_name) {
                    Some(info) => info.clone(),
                    None => {
                        let fetched = self.catalog.get_by_name(&like.book_name).await?;
                        book_info_cache.insert(like.book_name.clone(), fetched.clone());
                        fetched
                    }
                };
                if let Some(book) = info {
                    liked_books.push(book);
                }
            }
            // Popularity proxy orders each similar user's contribution.
            liked_books.sort_by(|a, b| a.popularity_score.total_cmp(&b.popularity_score).reverse());

            for book in liked_books {
                if recommendations.len() >= limit {
                    break;
                }
                if !meets_language_requirement(Some(&book.language), &user_languages) {
                    continue;
                }
                picked_names.push(book.name.clone());
                recommendations.push(book.to_summary_json());
            }
        }

        if recommendations.is_empty() {
            return Ok(RecommendationResponse::empty(
                "Readers similar to you have no new books for you yet",
            ));
        }
        let explanation = "Based on readers with taste similar to yours".to_string();
        Ok(RecommendationResponse::new(recommendations, explanation))
    }
}
