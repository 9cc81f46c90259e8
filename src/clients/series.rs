//! Client for the external series-detection collaborator. The core only
//! consumes this as an opaque lookup; a cache layer sits in front of it in
//! `engine::series`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured next-book suggestion from the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_in_series: Option<u32>,
}

/// Lookup result: either "not a series" or a suggestion with confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub is_series: bool,
    #[serde(default)]
    pub series_name: Option<String>,
    #[serde(default)]
    pub next_book: Option<NextBook>,
    #[serde(default)]
    pub confidence: f32,
}

#[async_trait]
pub trait SeriesDetector: Send + Sync {
    async fn lookup(&self, title: &str, author: &str) -> Result<SeriesInfo>;
}

#[derive(Debug, Clone)]
pub struct SeriesDetectorConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

pub struct HttpSeriesDetector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSeriesDetector {
    /// # Errors
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: SeriesDetectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build series detector client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SeriesDetector for HttpSeriesDetector {
    async fn lookup(&self, title: &str, author: &str) -> Result<SeriesInfo> {
        let url = format!("{}/v1/series", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("title", title), ("author", author)])
            .send()
            .await
            .context("series detector request failed")?
            .error_for_status()
            .context("series detector returned an error status")?;

        response
            .json::<SeriesInfo>()
            .await
            .context("malformed series detector response")
    }
}
