//! Feedback-triggered retraining: an atomically maintained interaction
//! counter that, on crossing its threshold, launches one background
//! training run (single-flight), records the outcome, and on success
//! reloads the engines and invalidates the recommendation caches.

pub mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::cache::{CacheLayer, prefix};
use crate::engine::collaborative::CollaborativeEngine;
use crate::engine::content::ContentBasedEngine;
use crate::observability::metrics::Metrics;
use crate::store::models::{CounterState, TrainingRecord, TrainingStatus};
use crate::store::traits::CounterStore;
use task::TrainingTask;

/// Anything the trigger must force-reload after a successful run.
#[async_trait]
pub trait ModelReload: Send + Sync {
    async fn force_reload(&self) -> Result<bool>;
}

#[async_trait]
impl ModelReload for CollaborativeEngine {
    async fn force_reload(&self) -> Result<bool> {
        Self::force_reload(self).await
    }
}

#[async_trait]
impl ModelReload for ContentBasedEngine {
    async fn force_reload(&self) -> Result<bool> {
        Self::force_reload(self).await
    }
}

#[derive(Clone)]
pub struct RetrainingTrigger {
    counter: Arc<dyn CounterStore>,
    cache: Arc<dyn CacheLayer>,
    task: Arc<dyn TrainingTask>,
    reload_targets: Arc<Vec<Arc<dyn ModelReload>>>,
    metrics: Arc<Metrics>,
    threshold: i64,
    timeout: Duration,
    training_in_progress: Arc<AtomicBool>,
}

impl RetrainingTrigger {
    #[must_use]
    pub fn new(
        counter: Arc<dyn CounterStore>,
        cache: Arc<dyn CacheLayer>,
        task: Arc<dyn TrainingTask>,
        reload_targets: Vec<Arc<dyn ModelReload>>,
        metrics: Arc<Metrics>,
        threshold: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            counter,
            cache,
            task,
            reload_targets: Arc::new(reload_targets),
            metrics,
            threshold,
            timeout,
            training_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Atomically count one like/dislike event. When the post-increment
    /// value crosses the threshold, the counter is reset as part of the
    /// same trigger decision and training launches in the background.
    /// Returns whether this call triggered a run.
    ///
    /// A trigger arriving while a run is in flight is dropped, not queued;
    /// the counter keeps accumulating so the crossing fires again after the
    /// current run releases the flag.
    pub async fn increment(&self) -> Result<bool> {
        let count = self.counter.increment().await?;
        if count < self.threshold {
            return Ok(false);
        }

        // Single-flight: only one run at a time, flag checked before the
        // counter is touched so a dropped trigger does not reset it.
        if self.training_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        // Compare-and-set reset. Losing the claim means a concurrent
        // crossing already consumed it.
        match self.counter.try_claim_threshold(self.threshold).await {
            Ok(true) => {}
            Ok(false) => {
                self.training_in_progress.store(false, Ordering::SeqCst);
                return Ok(false);
            }
            Err(err) => {
                self.training_in_progress.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }

        let trigger = self.clone();
        tokio::spawn(async move {
            trigger.execute_training(count).await;
        });
        Ok(true)
    }

    pub async fn state(&self) -> Result<CounterState> {
        self.counter.state().await
    }

    pub async fn training_history(&self, limit: usize) -> Result<Vec<TrainingRecord>> {
        self.counter.recent_training_records(limit).await
    }

    #[must_use]
    pub fn is_training(&self) -> bool {
        self.training_in_progress.load(Ordering::SeqCst)
    }

    /// Background training cycle: run the external job with a hard
    /// wall-clock timeout, record the outcome, and on success reload the
    /// engines and clear the recommendation caches. The in-flight flag is
    /// released on every path.
    async fn execute_training(&self, trigger_count: i64) {
        self.metrics.retrainings_triggered.inc();
        info!(trigger_count, "starting background training run");
        let started = Instant::now();

        let record_id = match self.counter.insert_training_record(trigger_count).await {
            Ok(id) => Some(id),
            Err(err) => {
                error!(error = %err, "failed to insert training record");
                None
            }
        };

        let outcome = tokio::time::timeout(self.timeout, self.task.run()).await;
        let duration = started.elapsed().as_secs_f64();
        self.metrics.training_duration.observe(duration);

        let (status, error_message, model_metrics) = match &outcome {
            Ok(Ok(output)) if output.success => {
                (TrainingStatus::Success, None, parse_training_metrics(&output.stdout))
            }
            Ok(Ok(output)) => (
                TrainingStatus::Failed,
                Some(format!("training exited non-zero: {}", output.stderr.trim())),
                serde_json::json!({}),
            ),
            Ok(Err(err)) => (
                TrainingStatus::Error,
                Some(format!("unexpected error during training: {err:#}")),
                serde_json::json!({}),
            ),
            // The timed-out future is dropped, which kills the child.
            Err(_) => (
                TrainingStatus::Timeout,
                Some(format!("training timed out after {duration:.1}s")),
                serde_json::json!({}),
            ),
        };

        if let Some(record_id) = record_id {
            if let Err(err) = self
                .counter
                .complete_training_record(
                    record_id,
                    status,
                    duration,
                    error_message.as_deref(),
                    model_metrics,
                )
                .await
            {
                error!(error = %err, "failed to complete training record");
            }
        }

        match status {
            TrainingStatus::Success => {
                info!(duration_seconds = duration, "training run succeeded");
                self.metrics.retrainings_succeeded.inc();
                if let Err(err) = self.counter.bump_total_retrainings().await {
                    warn!(error = %err, "failed to bump total retrainings");
                }
                self.reload_and_invalidate().await;
            }
            _ => {
                error!(
                    status = status.as_str(),
                    error = error_message.as_deref().unwrap_or(""),
                    "training run did not succeed"
                );
                self.metrics.retrainings_failed.inc();
            }
        }

        self.training_in_progress.store(false, Ordering::SeqCst);
    }

    /// Force every engine to reload its persisted model, then bulk-delete
    /// all recommendation cache prefixes. Runs for every prefix even when
    /// some match nothing.
    async fn reload_and_invalidate(&self) {
        for target in self.reload_targets.iter() {
            if let Err(err) = target.force_reload().await {
                warn!(error = %err, "model reload after training failed");
            }
        }
        for cache_prefix in prefix::RECOMMENDATION_PREFIXES {
            match self.cache.delete_pattern(&format!("{cache_prefix}:*")).await {
                Ok(deleted) => info!(prefix = cache_prefix, deleted, "cache prefix cleared"),
                Err(err) => warn!(prefix = cache_prefix, error = %err, "cache clear failed"),
            }
        }
    }
}

/// Best-effort parse of the human-readable summary lines the training job
/// prints on stdout.
#[must_use]
pub fn parse_training_metrics(stdout: &str) -> serde_json::Value {
    let mut metrics = serde_json::Map::new();
    for line in stdout.lines() {
        if let Some(raw) = line.strip_prefix("Total interactions:") {
            if let Ok(value) = raw.trim().replace(',', "").parse::<i64>() {
                metrics.insert("total_interactions".into(), value.into());
            }
        } else if let Some(raw) = line.strip_prefix("Total users:") {
            if let Ok(value) = raw.trim().replace(',', "").parse::<i64>() {
                metrics.insert("total_users".into(), value.into());
            }
        } else if let Some(raw) = line.strip_prefix("Total books:") {
            if let Ok(value) = raw.trim().replace(',', "").parse::<i64>() {
                metrics.insert("total_books".into(), value.into());
            }
        } else if let Some(raw) = line.strip_prefix("Training time:") {
            let first_token = raw.trim().split_whitespace().next().unwrap_or("");
            if let Ok(value) = first_token.parse::<f64>() {
                metrics.insert("training_time_seconds".into(), value.into());
            }
        }
    }
    serde_json::Value::Object(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;
    use crate::trainer::task::testing::ScriptedTrainingTask;
    use futures::future::join_all;
    use prometheus::Registry;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new(&Registry::new()).expect("metrics"))
    }

    fn trigger_with(
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        task: Arc<ScriptedTrainingTask>,
        threshold: i64,
        timeout: Duration,
    ) -> Arc<RetrainingTrigger> {
        Arc::new(RetrainingTrigger::new(
            store,
            cache,
            task,
            vec![],
            metrics(),
            threshold,
            timeout,
        ))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn below_threshold_never_triggers() {
        let store = Arc::new(MemoryStore::new(10));
        let task = Arc::new(ScriptedTrainingTask::succeeding(""));
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task.clone(),
            10,
            Duration::from_secs(5),
        );

        for _ in 0..9 {
            assert!(!trigger.increment().await.unwrap());
        }
        settle().await;
        assert_eq!(task.run_count(), 0);
        assert_eq!(store.state().await.unwrap().current_count, 9);
    }

    #[tokio::test]
    async fn tenth_increment_triggers_once_and_resets() {
        let store = Arc::new(MemoryStore::new(10));
        let task = Arc::new(ScriptedTrainingTask::succeeding(
            "Total interactions: 1,234\nTotal users: 56\nTotal books: 789\nTraining time: 12.5 seconds\n",
        ));
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task.clone(),
            10,
            Duration::from_secs(5),
        );

        for _ in 0..9 {
            assert!(!trigger.increment().await.unwrap());
        }
        assert!(trigger.increment().await.unwrap());
        settle().await;

        assert_eq!(task.run_count(), 1);
        let state = store.state().await.unwrap();
        assert_eq!(state.current_count, 0);
        assert_eq!(state.total_retrainings, 1);

        let records = store.recent_training_records(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TrainingStatus::Success);
        assert_eq!(records[0].trigger_count, 10);
        assert_eq!(
            records[0].model_metrics.get("total_interactions"),
            Some(&serde_json::json!(1234))
        );
        assert_eq!(
            records[0].model_metrics.get("training_time_seconds"),
            Some(&serde_json::json!(12.5))
        );
    }

    #[tokio::test]
    async fn concurrent_increments_trigger_exactly_once() {
        let store = Arc::new(MemoryStore::new(10));
        let task = Arc::new(ScriptedTrainingTask::succeeding(""));
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task.clone(),
            10,
            Duration::from_secs(5),
        );

        let results = join_all((0..10).map(|_| {
            let trigger = Arc::clone(&trigger);
            async move { trigger.increment().await.unwrap() }
        }))
        .await;
        settle().await;

        let triggered = results.iter().filter(|&&t| t).count();
        assert_eq!(triggered, 1, "exactly one increment must trigger");
        assert_eq!(task.run_count(), 1);
    }

    #[tokio::test]
    async fn trigger_while_running_is_dropped() {
        let store = Arc::new(MemoryStore::new(2));
        let task = Arc::new(
            ScriptedTrainingTask::succeeding("").with_delay(Duration::from_millis(300)),
        );
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task.clone(),
            2,
            Duration::from_secs(5),
        );

        trigger.increment().await.unwrap();
        assert!(trigger.increment().await.unwrap());
        assert!(trigger.is_training());

        // A fresh crossing during the run is dropped, not queued.
        assert!(!trigger.increment().await.unwrap());
        assert!(!trigger.increment().await.unwrap());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(task.run_count(), 1);
        assert!(!trigger.is_training());
    }

    #[tokio::test]
    async fn failed_training_records_failed_status() {
        let store = Arc::new(MemoryStore::new(1));
        let task = Arc::new(ScriptedTrainingTask::failing("matrix build failed"));
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task.clone(),
            1,
            Duration::from_secs(5),
        );

        assert!(trigger.increment().await.unwrap());
        settle().await;

        let records = store.recent_training_records(10).await.unwrap();
        assert_eq!(records[0].status, TrainingStatus::Failed);
        assert!(records[0].error_message.as_deref().unwrap().contains("matrix build failed"));
        assert_eq!(store.state().await.unwrap().total_retrainings, 0);
        // Flag released: the next crossing can trigger again.
        assert!(trigger.increment().await.unwrap());
    }

    #[tokio::test]
    async fn erroring_training_records_error_status() {
        let store = Arc::new(MemoryStore::new(1));
        let task = Arc::new(ScriptedTrainingTask::erroring("spawn failed"));
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task,
            1,
            Duration::from_secs(5),
        );

        assert!(trigger.increment().await.unwrap());
        settle().await;

        let records = store.recent_training_records(10).await.unwrap();
        assert_eq!(records[0].status, TrainingStatus::Error);
    }

    #[tokio::test]
    async fn slow_training_records_timeout() {
        let store = Arc::new(MemoryStore::new(1));
        let task = Arc::new(
            ScriptedTrainingTask::succeeding("").with_delay(Duration::from_secs(10)),
        );
        let trigger = trigger_with(
            store.clone(),
            Arc::new(MemoryCache::new()),
            task,
            1,
            Duration::from_millis(50),
        );

        assert!(trigger.increment().await.unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;

        let records = store.recent_training_records(10).await.unwrap();
        assert_eq!(records[0].status, TrainingStatus::Timeout);
        assert!(!trigger.is_training());
    }

    #[tokio::test]
    async fn success_clears_recommendation_cache_prefixes() {
        let store = Arc::new(MemoryStore::new(1));
        let cache = Arc::new(MemoryCache::new());
        for cache_prefix in prefix::RECOMMENDATION_PREFIXES {
            cache
                .set(&format!("{cache_prefix}:user:x"), serde_json::json!(1), None)
                .await
                .unwrap();
        }
        // Series cache is outside the invalidation contract.
        cache
            .set("series:abc", serde_json::json!(1), None)
            .await
            .unwrap();

        let task = Arc::new(ScriptedTrainingTask::succeeding(""));
        let trigger = trigger_with(store, cache.clone(), task, 1, Duration::from_secs(5));

        assert!(trigger.increment().await.unwrap());
        settle().await;

        for cache_prefix in prefix::RECOMMENDATION_PREFIXES {
            assert_eq!(
                cache.get(&format!("{cache_prefix}:user:x")).await.unwrap(),
                None,
                "prefix {cache_prefix} should be cleared"
            );
        }
        assert!(cache.get("series:abc").await.unwrap().is_some());
    }

    #[test]
    fn metrics_parsing_is_best_effort() {
        let parsed = parse_training_metrics("garbage\nTotal interactions: not-a-number\n");
        assert_eq!(parsed, serde_json::json!({}));
    }
}
