//! Content feature pipeline: four extractors over book records plus a
//! linear reducer down to a fixed-width dense vector.

pub mod encoders;
pub mod reduce;
pub mod text;

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array1;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::models::BookRecord;
use encoders::{AuthorEncoder, GenreBinarizer, YearScaler};
use reduce::TruncatedSvd;
use text::TfidfVectorizer;

/// Fixed output width of every feature vector.
pub const VECTOR_DIM: usize = 256;

/// Genre and author blocks are weighted up relative to text and year.
const CATEGORY_WEIGHT: f32 = 2.0;

/// Fixed seed keeps refits reproducible.
const SVD_SEED: u64 = 42;

const ARTIFACT_FILE: &str = "feature_extractors.json";

/// Sparse row: (column index, value) pairs sorted by index.
pub type SparseVec = Vec<(usize, f32)>;

/// Fitted feature pipeline. `transform` is deterministic for a given fit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturePipeline {
    tfidf: TfidfVectorizer,
    genres: GenreBinarizer,
    authors: AuthorEncoder,
    years: YearScaler,
    svd: TruncatedSvd,
    fitted: bool,
}

impl FeaturePipeline {
    /// Fit all extractors and the reducer on a bounded representative
    /// sample, never the full corpus.
    pub fn fit(&mut self, sample: &[BookRecord], max_features: usize) {
        let summaries: Vec<&str> = sample.iter().map(|b| b.summary.as_str()).collect();
        let genre_lists: Vec<Vec<String>> = sample.iter().map(|b| b.genres.clone()).collect();
        let authors: Vec<&str> = sample.iter().map(|b| b.author.as_str()).collect();
        let years: Vec<i32> = sample.iter().map(|b| b.year).collect();

        self.tfidf = TfidfVectorizer::new(max_features);
        self.tfidf.fit(&summaries);
        self.genres = GenreBinarizer::default();
        self.genres.fit(&genre_lists);
        self.authors = AuthorEncoder::default();
        self.authors.fit(&authors);
        self.years = YearScaler::default();
        self.years.fit(&years);

        let rows: Vec<SparseVec> = sample.iter().map(|b| self.combined_row(b)).collect();
        self.svd = TruncatedSvd::fit(&rows, self.combined_width(), VECTOR_DIM, SVD_SEED);
        self.fitted = true;
    }

    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Width of the weighted sparse concatenation fed into the reducer.
    #[must_use]
    pub fn combined_width(&self) -> usize {
        self.tfidf.width() + self.genres.width() + self.authors.width() + 1
    }

    /// Weighted concatenation of all four feature blocks for one book.
    /// Missing fields contribute empty blocks rather than failing.
    fn combined_row(&self, book: &BookRecord) -> SparseVec {
        let mut row = self.tfidf.transform(&book.summary);

        let genre_offset = self.tfidf.width();
        for (idx, value) in self.genres.transform(&book.genres) {
            row.push((genre_offset + idx, value * CATEGORY_WEIGHT));
        }

        let author_offset = genre_offset + self.genres.width();
        for (idx, value) in self.authors.transform(&book.author) {
            row.push((author_offset + idx, value * CATEGORY_WEIGHT));
        }

        let year_offset = author_offset + self.authors.width();
        let year = self.years.transform(book.year);
        if year != 0.0 {
            row.push((year_offset, year));
        }

        row
    }

    /// Transform one book into a fixed-width L2-normalized vector.
    #[must_use]
    pub fn transform(&self, book: &BookRecord) -> Array1<f32> {
        let reduced = self.svd.transform(&self.combined_row(book));
        let mut out = Array1::<f32>::zeros(VECTOR_DIM);
        for (i, value) in reduced.iter().enumerate().take(VECTOR_DIM) {
            out[i] = *value;
        }
        let norm = out.dot(&out).sqrt();
        if norm > 0.0 {
            out /= norm;
        }
        out
    }

    /// Batch transform for training chunks.
    #[must_use]
    pub fn transform_batch(&self, books: &[BookRecord]) -> Vec<Array1<f32>> {
        books.par_iter().map(|b| self.transform(b)).collect()
    }

    /// Persist the fitted extractors atomically (write-then-rename).
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model dir {}", dir.display()))?;
        let path = dir.join(ARTIFACT_FILE);
        let tmp = dir.join(format!("{ARTIFACT_FILE}.tmp"));
        let payload =
            serde_json::to_vec(self).context("failed to serialize feature extractors")?;
        std::fs::write(&tmp, payload)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to finalize {}", path.display()))?;
        Ok(())
    }

    /// Load persisted extractors; `None` when no artifact exists yet.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(ARTIFACT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let pipeline =
            serde_json::from_slice(&raw).context("malformed feature extractor artifact")?;
        Ok(Some(pipeline))
    }
}

/// Bounded insertion-order vector cache. Once the cap is exceeded, the
/// oldest-inserted batch is evicted; this is deliberately FIFO, not LRU.
#[derive(Debug)]
pub struct VectorCache {
    cap: usize,
    evict_batch: usize,
    entries: FxHashMap<Uuid, Array1<f32>>,
    order: VecDeque<Uuid>,
}

impl VectorCache {
    #[must_use]
    pub fn new(cap: usize, evict_batch: usize) -> Self {
        Self {
            cap,
            evict_batch: evict_batch.max(1),
            entries: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&Array1<f32>> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, id: Uuid, vector: Array1<f32>) {
        if self.entries.insert(id, vector).is_none() {
            self.order.push_back(id);
        }
        if self.entries.len() > self.cap {
            for _ in 0..self.evict_batch {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(name: &str, summary: &str, genres: &[&str], author: &str, year: i32) -> BookRecord {
        BookRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            author: author.to_string(),
            genres: genres.iter().map(ToString::to_string).collect(),
            summary: summary.to_string(),
            year,
            language: "english".to_string(),
            star_rating: Some(4.0),
            num_ratings: 100,
            popularity_score: 1.0,
        }
    }

    #[test]
    fn transform_produces_unit_vector_of_fixed_width() {
        let mut pipeline = FeaturePipeline::default();
        let sample = vec![book(
            "A Wizard of Earthsea",
            "a young wizard learns the true names of things at the school of magic",
            &["Fantasy"],
            "Ursula K. Le Guin",
            1968,
        )];
        pipeline.fit(&sample, 10_000);

        let vector = pipeline.transform(&sample[0]);
        assert_eq!(vector.len(), VECTOR_DIM);
        let norm = vector.dot(&vector).sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }

    #[test]
    fn transform_is_deterministic() {
        let mut pipeline = FeaturePipeline::default();
        let sample = vec![
            book("A", "dragons over the burning city", &["Fantasy"], "X", 1999),
            book("B", "a detective walks the rainy streets", &["Mystery"], "Y", 2004),
        ];
        pipeline.fit(&sample, 10_000);
        let first = pipeline.transform(&sample[0]);
        let second = pipeline.transform(&sample[0]);
        assert_eq!(first, second);
    }

    #[test]
    fn missing_fields_fall_back_to_empty_defaults() {
        let mut pipeline = FeaturePipeline::default();
        let sample = vec![
            book("A", "dragons over the burning city", &["Fantasy"], "X", 1999),
            book("B", "a detective walks the rainy streets", &["Mystery"], "Y", 2004),
        ];
        pipeline.fit(&sample, 10_000);

        let empty = book("C", "", &[], "", 0);
        let vector = pipeline.transform(&empty);
        assert_eq!(vector.len(), VECTOR_DIM);
    }

    #[test]
    fn save_load_roundtrip_preserves_transform() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = FeaturePipeline::default();
        let sample = vec![
            book("A", "dragons over the burning city", &["Fantasy"], "X", 1999),
            book("B", "a detective walks the rainy streets", &["Mystery"], "Y", 2004),
        ];
        pipeline.fit(&sample, 10_000);
        pipeline.save(dir.path()).unwrap();

        let loaded = FeaturePipeline::load(dir.path()).unwrap().expect("artifact");
        assert!(loaded.is_fitted());
        assert_eq!(loaded.transform(&sample[0]), pipeline.transform(&sample[0]));
    }

    #[test]
    fn load_missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FeaturePipeline::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn vector_cache_evicts_oldest_batch() {
        let mut cache = VectorCache::new(3, 2);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            cache.insert(*id, Array1::zeros(2));
        }
        // Cap 3 exceeded at the fourth insert: the two oldest are evicted.
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ids[0]).is_none());
        assert!(cache.get(&ids[1]).is_none());
        assert!(cache.get(&ids[2]).is_some());
        assert!(cache.get(&ids[3]).is_some());
    }
}
