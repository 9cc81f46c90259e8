//! End-to-end flows over the in-memory store: feature pipeline contract,
//! interaction overwrite semantics, and the counter-driven retraining
//! trigger.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use prometheus::Registry;
use uuid::Uuid;

use reco_worker::cache::MemoryCache;
use reco_worker::engine::authors::AuthorAffinityStore;
use reco_worker::features::{FeaturePipeline, VECTOR_DIM};
use reco_worker::interaction::InteractionService;
use reco_worker::observability::metrics::Metrics;
use reco_worker::store::MemoryStore;
use reco_worker::store::models::{Action, BookRecord};
use reco_worker::store::traits::{CounterStore, InteractionStore};
use reco_worker::trainer::RetrainingTrigger;
use reco_worker::trainer::task::{TrainingOutput, TrainingTask};

struct CountingTask {
    runs: AtomicUsize,
}

#[async_trait]
impl TrainingTask for CountingTask {
    async fn run(&self) -> Result<TrainingOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(TrainingOutput {
            success: true,
            stdout: "Total interactions: 10\n".to_string(),
            stderr: String::new(),
        })
    }
}

fn book(name: &str, author: &str, genres: &[&str], summary: &str) -> BookRecord {
    BookRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        author: author.to_string(),
        genres: genres.iter().map(ToString::to_string).collect(),
        summary: summary.to_string(),
        year: 2001,
        language: "english".to_string(),
        star_rating: Some(4.2),
        num_ratings: 321,
        popularity_score: 2.5,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    service: InteractionService,
    affinity: Arc<AuthorAffinityStore>,
    task: Arc<CountingTask>,
}

fn harness(threshold: i64) -> Harness {
    let store = Arc::new(MemoryStore::new(threshold));
    let cache = Arc::new(MemoryCache::new());
    let metrics = Arc::new(Metrics::new(&Registry::new()).expect("metrics"));
    let affinity = Arc::new(AuthorAffinityStore::new(store.clone()));
    let task = Arc::new(CountingTask {
        runs: AtomicUsize::new(0),
    });
    let trigger = Arc::new(RetrainingTrigger::new(
        store.clone(),
        cache.clone(),
        task.clone(),
        vec![],
        metrics.clone(),
        threshold,
        Duration::from_secs(5),
    ));
    let service = InteractionService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        affinity.clone(),
        trigger,
        cache,
        metrics,
    );
    Harness {
        store,
        service,
        affinity,
        task,
    }
}

#[test]
fn one_book_sample_produces_a_unit_vector() {
    let seeded = book(
        "The Dispossessed",
        "Ursula K. Le Guin",
        &["Science Fiction"],
        "a physicist travels between two worlds divided by ideology",
    );
    let mut pipeline = FeaturePipeline::default();
    pipeline.fit(std::slice::from_ref(&seeded), 10_000);

    let vector = pipeline.transform(&seeded);
    assert_eq!(vector.len(), VECTOR_DIM);
    let norm = vector.dot(&vector).sqrt();
    assert!((norm - 1.0).abs() < 1e-4, "expected unit norm, got {norm}");
}

#[tokio::test]
async fn like_then_dislike_overwrite_removes_top_author() {
    let h = harness(100);
    let user = Uuid::new_v4();
    h.store
        .add_book(book("A", "X", &["Fantasy"], "a tale of swords"))
        .await;

    h.service.record(user, "A", Action::Like).await.unwrap();
    let top = h.affinity.top(user).await.unwrap().expect("top author");
    assert_eq!(top.author_name, "X");
    assert_eq!(top.preference_count, 1);

    // Overwrite in place: the like's deltas are undone before the dislike
    // applies.
    h.service.record(user, "A", Action::Dislike).await.unwrap();
    assert!(h.affinity.top(user).await.unwrap().is_none());
    assert_eq!(h.store.count_for_user(user).await.unwrap(), 1);
}

#[tokio::test]
async fn tenth_interaction_triggers_training_once_and_resets_counter() {
    let h = harness(10);
    let user = Uuid::new_v4();
    for i in 0..10 {
        let name = format!("book-{i}");
        h.store
            .add_book(book(&name, "X", &["Fantasy"], "words"))
            .await;
    }

    for i in 0..9 {
        h.service
            .record(user, &format!("book-{i}"), Action::Like)
            .await
            .unwrap();
    }
    assert_eq!(h.store.state().await.unwrap().current_count, 9);
    assert_eq!(h.task.runs.load(Ordering::SeqCst), 0);

    h.service.record(user, "book-9", Action::Like).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.task.runs.load(Ordering::SeqCst), 1);
    let state = h.store.state().await.unwrap();
    assert_eq!(state.current_count, 0);
    assert_eq!(state.total_retrainings, 1);
}
