//! Collaborative model training entry point.
//!
//! Invoked with no arguments by the retraining trigger (and manually for
//! cold starts): rebuilds the user×item matrix from the interaction store,
//! factorizes it, persists the model plus mappings, and refreshes the
//! per-user similarity table. The summary lines printed on stdout are
//! parsed best-effort by the counter subsystem.

use std::time::Instant;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use reco_worker::config::Config;
use reco_worker::engine::als::{AlsModel, AlsParams};
use reco_worker::engine::collaborative::{
    build_interaction_matrix, compute_similarity_table, save_model,
};
use reco_worker::store::SqlxStore;
use reco_worker::store::traits::{InteractionStore, SimilarityStore, UserProfileStore};

const TRAIN_SEED: u64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(config.db_acquire_timeout())
        .connect(config.db_dsn())
        .await
        .context("failed to connect to database")?;
    let store = SqlxStore::new(pool, config.retrain_threshold());

    let interactions = store
        .all()
        .await
        .context("failed to fetch interactions")?;
    let Some((matrix, mappings)) =
        build_interaction_matrix(&interactions, config.like_weight(), config.dislike_weight())
    else {
        anyhow::bail!("no interactions available, nothing to train on");
    };

    let params = AlsParams {
        factors: config.als_factors(),
        regularization: config.als_regularization(),
        iterations: config.als_iterations(),
        alpha: config.als_alpha(),
    };
    let model =
        AlsModel::train(&matrix, params, TRAIN_SEED).context("ALS training failed")?;
    save_model(config.model_dir(), &model, &mappings)
        .context("failed to persist model artifacts")?;

    let registered = store
        .registered_user_ids()
        .await
        .context("failed to list registered users")?;
    let table = compute_similarity_table(
        &model,
        &mappings,
        &registered,
        config.similar_users_top_k(),
    );
    store
        .replace_all(&table)
        .await
        .context("failed to persist user similarity table")?;

    println!("Total interactions: {}", interactions.len());
    println!("Total users: {}", mappings.users.len());
    println!("Total books: {}", mappings.items.len());
    println!("Training time: {:.1} seconds", started.elapsed().as_secs_f64());

    Ok(())
}
