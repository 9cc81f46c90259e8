use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;

use crate::{
    api,
    cache::{CacheLayer, MemoryCache},
    clients::{HttpSeriesDetector, SeriesDetector, SeriesDetectorConfig},
    config::Config,
    engine::{
        authors::AuthorAffinityStore,
        collaborative::{CollaborativeEngine, CollaborativeEngineConfig},
        content::{ContentBasedEngine, ContentEngineConfig},
        language::LanguageDetector,
        series::{ContinueReadingEngine, SeriesLookupService},
    },
    index::IndexConfig,
    interaction::InteractionService,
    observability::Telemetry,
    store::SqlxStore,
    trainer::{ModelReload, RetrainingTrigger, task::ProcessTrainingTask},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    cache: Arc<dyn CacheLayer>,
    store: Arc<SqlxStore>,
    detector: Arc<LanguageDetector>,
    affinity: Arc<AuthorAffinityStore>,
    content_engine: Arc<ContentBasedEngine>,
    collaborative_engine: Arc<CollaborativeEngine>,
    continue_reading: Arc<ContinueReadingEngine>,
    trigger: Arc<RetrainingTrigger>,
    interaction_service: Arc<InteractionService>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn config(&self) -> &Config {
        &self.registry.config
    }

    pub(crate) fn cache(&self) -> Arc<dyn CacheLayer> {
        Arc::clone(&self.registry.cache)
    }

    pub(crate) fn store(&self) -> Arc<SqlxStore> {
        Arc::clone(&self.registry.store)
    }

    pub(crate) fn detector(&self) -> Arc<LanguageDetector> {
        Arc::clone(&self.registry.detector)
    }

    pub(crate) fn affinity(&self) -> Arc<AuthorAffinityStore> {
        Arc::clone(&self.registry.affinity)
    }

    pub(crate) fn content_engine(&self) -> Arc<ContentBasedEngine> {
        Arc::clone(&self.registry.content_engine)
    }

    pub(crate) fn collaborative_engine(&self) -> Arc<CollaborativeEngine> {
        Arc::clone(&self.registry.collaborative_engine)
    }

    pub(crate) fn continue_reading(&self) -> Arc<ContinueReadingEngine> {
        Arc::clone(&self.registry.continue_reading)
    }

    pub(crate) fn trigger(&self) -> Arc<RetrainingTrigger> {
        Arc::clone(&self.registry.trigger)
    }

    pub(crate) fn interaction_service(&self) -> Arc<InteractionService> {
        Arc::clone(&self.registry.interaction_service)
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// Leaf components are built first and injected upward; nothing is
    /// constructed lazily or via globals.
    ///
    /// # Errors
    /// Telemetry の初期化や接続プール構築が失敗した場合はエラーを返す。
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;
        let metrics = telemetry.metrics_arc();

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections())
            .min_connections(config.db_min_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .test_before_acquire(true)
            .connect_lazy(config.db_dsn())
            .context("failed to configure database connection pool")?;
        let store = Arc::new(SqlxStore::new(pool, config.retrain_threshold()));
        let cache: Arc<dyn CacheLayer> = Arc::new(MemoryCache::new());

        let detector = Arc::new(LanguageDetector::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.fallback_language(),
            config.max_user_languages(),
            config.min_language_count(),
        ));
        let affinity = Arc::new(AuthorAffinityStore::new(store.clone()));

        let training_task = Arc::new(ProcessTrainingTask::new(config.train_command()));

        let content_engine = Arc::new(ContentBasedEngine::new(
            store.clone(),
            store.clone(),
            Arc::clone(&detector),
            Arc::clone(&cache),
            ContentEngineConfig {
                model_dir: config.model_dir().to_path_buf(),
                fit_sample_size: config.fit_sample_size(),
                chunk_size: config.train_chunk_size(),
                tfidf_max_features: config.tfidf_max_features(),
                index: IndexConfig {
                    flat_threshold: config.ivf_threshold(),
                    nprobe: config.ivf_nprobe(),
                },
                alt_anchor_pool: config.alt_anchor_pool(),
                vector_cache_cap: config.vector_cache_cap(),
                vector_cache_evict: config.vector_cache_evict(),
                cache_ttl: config.recommendations_ttl(),
            },
        ));
        let collaborative_engine = Arc::new(CollaborativeEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::clone(&detector),
            Arc::clone(&cache),
            training_task.clone(),
            CollaborativeEngineConfig {
                model_dir: config.model_dir().to_path_buf(),
                similarity_floor: config.similarity_floor(),
                training_timeout: config.training_timeout(),
                cache_ttl: config.recommendations_ttl(),
            },
        ));

        let series_detector: Option<Arc<dyn SeriesDetector>> = match config.series_base_url() {
            Some(base_url) => Some(Arc::new(
                HttpSeriesDetector::new(SeriesDetectorConfig {
                    base_url: base_url.to_string(),
                    connect_timeout: config.series_connect_timeout(),
                    total_timeout: config.series_total_timeout(),
                })
                .context("failed to build series detector client")?,
            )),
            None => None,
        };
        let series_lookup = Arc::new(SeriesLookupService::new(
            series_detector,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            config.series_ttl(),
            config.series_negative_ttl(),
        ));
        let continue_reading = Arc::new(ContinueReadingEngine::new(
            store.clone(),
            store.clone(),
            series_lookup,
            Arc::clone(&cache),
            config.continue_reading_ttl(),
        ));

        let reload_targets: Vec<Arc<dyn ModelReload>> = vec![
            Arc::clone(&collaborative_engine) as Arc<dyn ModelReload>,
            Arc::clone(&content_engine) as Arc<dyn ModelReload>,
        ];
        let trigger = Arc::new(RetrainingTrigger::new(
            store.clone(),
            Arc::clone(&cache),
            training_task,
            reload_targets,
            Arc::clone(&metrics),
            config.retrain_threshold(),
            config.training_timeout(),
        ));

        let interaction_service = Arc::new(InteractionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::clone(&affinity),
            Arc::clone(&trigger),
            Arc::clone(&cache),
            metrics,
        ));

        Ok(Self {
            config,
            telemetry,
            cache,
            store,
            detector,
            affinity,
            content_engine,
            collaborative_engine,
            continue_reading,
            trigger,
            interaction_service,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn content_engine(&self) -> Arc<ContentBasedEngine> {
        Arc::clone(&self.content_engine)
    }

    #[must_use]
    pub fn collaborative_engine(&self) -> Arc<CollaborativeEngine> {
        Arc::clone(&self.collaborative_engine)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
