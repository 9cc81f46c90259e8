/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub recommendations_served: Counter,
    pub recommendations_empty: Counter,
    pub interactions_recorded: Counter,
    pub retrainings_triggered: Counter,
    pub retrainings_succeeded: Counter,
    pub retrainings_failed: Counter,
    pub series_lookup_failures: Counter,

    // ヒストグラム
    pub content_query_duration: Histogram,
    pub collaborative_query_duration: Histogram,
    pub training_duration: Histogram,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            recommendations_served: register_counter_with_registry!(
                "reco_recommendations_served_total",
                "Total number of recommendation responses served",
                registry
            )?,
            recommendations_empty: register_counter_with_registry!(
                "reco_recommendations_empty_total",
                "Total number of recommendation responses that degraded to empty",
                registry
            )?,
            interactions_recorded: register_counter_with_registry!(
                "reco_interactions_recorded_total",
                "Total number of like/dislike interactions recorded",
                registry
            )?,
            retrainings_triggered: register_counter_with_registry!(
                "reco_retrainings_triggered_total",
                "Total number of background retrainings triggered",
                registry
            )?,
            retrainings_succeeded: register_counter_with_registry!(
                "reco_retrainings_succeeded_total",
                "Total number of background retrainings that completed successfully",
                registry
            )?,
            retrainings_failed: register_counter_with_registry!(
                "reco_retrainings_failed_total",
                "Total number of background retrainings that failed or timed out",
                registry
            )?,
            series_lookup_failures: register_counter_with_registry!(
                "reco_series_lookup_failures_total",
                "Total number of failed or malformed series-detection lookups",
                registry
            )?,
            content_query_duration: register_histogram_with_registry!(
                "reco_content_query_duration_seconds",
                "Duration of content-based recommendation queries",
                registry
            )?,
            collaborative_query_duration: register_histogram_with_registry!(
                "reco_collaborative_query_duration_seconds",
                "Duration of collaborative recommendation queries",
                registry
            )?,
            training_duration: register_histogram_with_registry!(
                "reco_training_duration_seconds",
                "Duration of background training runs",
                registry
            )?,
        })
    }
}
