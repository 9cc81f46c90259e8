//! Recommendation engines: content similarity, collaborative cascade,
//! author affinity, and the continue-reading series walker.

pub mod als;
pub mod authors;
pub mod collaborative;
pub mod content;
pub mod language;
pub mod series;

use serde::{Deserialize, Serialize};

/// Uniform engine response. Hard failures degrade to an empty set plus an
/// explanation instead of surfacing an error to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<serde_json::Value>,
    pub count: usize,
    pub explanation: String,
}

impl RecommendationResponse {
    #[must_use]
    pub fn new(recommendations: Vec<serde_json::Value>, explanation: impl Into<String>) -> Self {
        Self {
            count: recommendations.len(),
            recommendations,
            explanation: explanation.into(),
        }
    }

    #[must_use]
    pub fn empty(explanation: impl Into<String>) -> Self {
        Self {
            recommendations: Vec::new(),
            count: 0,
            explanation: explanation.into(),
        }
    }
}
