//! Per-language approximate-nearest-neighbor indices over book feature
//! vectors.
//!
//! Small corpora get a flat exact-search structure; larger ones get an
//! inverted (IVF) structure whose coarse quantizer is trained with k-means
//! before insertion. Both score by inner product, which equals cosine
//! similarity for the L2-normalized vectors the feature pipeline emits.

mod kmeans;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use kmeans::KMeans;

const KMEANS_ITERATIONS: usize = 25;
const KMEANS_SEED: u64 = 42;
const MIN_PARTITIONS: usize = 10;

/// Index build parameters. `flat_threshold` decides flat vs IVF; `nprobe`
/// is how many partitions an IVF query scans.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    pub flat_threshold: usize,
    pub nprobe: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            flat_threshold: 1000,
            nprobe: 8,
        }
    }
}

/// Exact inner-product search over all rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    vectors: Array2<f32>,
}

/// Inverted-file index: rows are bucketed under their nearest trained
/// centroid; queries scan the `nprobe` closest buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    centroids: Array2<f32>,
    lists: Vec<Vec<usize>>,
    vectors: Array2<f32>,
    nprobe: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl AnnIndex {
    /// Build an index for one language's vectors. Below the threshold the
    /// corpus is searched exactly; at or above it, an IVF structure with
    /// roughly sqrt(n) partitions is trained first.
    #[must_use]
    pub fn build(vectors: Array2<f32>, config: IndexConfig) -> Self {
        let n = vectors.nrows();
        if n < config.flat_threshold {
            return Self::Flat(FlatIndex { vectors });
        }

        let nlist = ((n as f64).sqrt() as usize).max(MIN_PARTITIONS);
        let trained = KMeans::new(&vectors, nlist, KMEANS_ITERATIONS, KMEANS_SEED);
        let centroids = trained.centroids;

        let mut lists: Vec<Vec<usize>> = vec![Vec::new(); centroids.nrows()];
        for (row_idx, row) in vectors.rows().into_iter().enumerate() {
            let bucket = nearest_centroid(&centroids, &row);
            lists[bucket].push(row_idx);
        }

        Self::Ivf(IvfIndex {
            centroids,
            lists,
            vectors,
            nprobe: config.nprobe,
        })
    }

    /// Number of indexed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.vectors.nrows(),
            Self::Ivf(ivf) => ivf.vectors.nrows(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-k rows by inner product, descending: (row index, score).
    #[must_use]
    pub fn search(&self, query: &ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
        match self {
            Self::Flat(flat) => {
                let mut scored: Vec<(usize, f32)> = flat
                    .vectors
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(i, row)| (i, row.dot(query)))
                    .collect();
                top_k(&mut scored, k);
                scored
            }
            Self::Ivf(ivf) => {
                let mut by_centroid: Vec<(usize, f32)> = ivf
                    .centroids
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (i, c.dot(query)))
                    .collect();
                top_k(&mut by_centroid, ivf.nprobe);

                let mut scored: Vec<(usize, f32)> = by_centroid
                    .iter()
                    .flat_map(|&(bucket, _)| ivf.lists[bucket].iter())
                    .map(|&row_idx| (row_idx, ivf.vectors.row(row_idx).dot(query)))
                    .collect();
                top_k(&mut scored, k);
                scored
            }
        }
    }
}

fn nearest_centroid(centroids: &Array2<f32>, row: &ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_score = f32::MIN;
    for (i, centroid) in centroids.rows().into_iter().enumerate() {
        let score = centroid.dot(row);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

fn top_k(scored: &mut Vec<(usize, f32)>, k: usize) {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
}

/// One language's index together with the id list aligned to its row order.
/// Row `i` always corresponds to `ids[i]`; the pair is persisted and loaded
/// together so they cannot drift.
#[derive(Debug, Clone)]
pub struct LanguageIndex {
    index: AnnIndex,
    ids: Vec<Uuid>,
}

impl LanguageIndex {
    /// # Errors
    /// Returns an error if the id list length does not match the index rows.
    pub fn new(index: AnnIndex, ids: Vec<Uuid>) -> Result<Self> {
        anyhow::ensure!(
            index.len() == ids.len(),
            "index rows ({}) and id list ({}) are misaligned",
            index.len(),
            ids.len()
        );
        Ok(Self { index, ids })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ranked (book id, inner-product score), descending. Any position
    /// whose row exceeds the id list is dropped.
    #[must_use]
    pub fn query(&self, vector: &ArrayView1<f32>, k: usize) -> Vec<(Uuid, f32)> {
        self.index
            .search(vector, k)
            .into_iter()
            .filter_map(|(row, score)| self.ids.get(row).map(|id| (*id, score)))
            .collect()
    }

    fn index_path(dir: &Path, language: &str) -> PathBuf {
        dir.join(format!("ann_index_{language}.json"))
    }

    fn ids_path(dir: &Path, language: &str) -> PathBuf {
        dir.join(format!("book_ids_{language}.json"))
    }

    /// Persist index and id list. Each file is written to a temp location
    /// and renamed in, so a concurrent reader never sees a half-written
    /// artifact.
    pub fn persist(&self, dir: &Path, language: &str) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create index dir {}", dir.display()))?;
        write_atomic(&Self::ids_path(dir, language), &serde_json::to_vec(&self.ids)?)?;
        write_atomic(
            &Self::index_path(dir, language),
            &serde_json::to_vec(&self.index)?,
        )?;
        Ok(())
    }

    /// Load one language's index. Fails softly: missing or misaligned
    /// artifacts produce `None`, never an error surfaced to queries.
    pub fn load(dir: &Path, language: &str) -> Result<Option<Self>> {
        let index_path = Self::index_path(dir, language);
        let ids_path = Self::ids_path(dir, language);
        if !index_path.exists() || !ids_path.exists() {
            return Ok(None);
        }

        let index: AnnIndex = serde_json::from_slice(
            &std::fs::read(&index_path)
                .with_context(|| format!("failed to read {}", index_path.display()))?,
        )
        .context("malformed index artifact")?;
        let ids: Vec<Uuid> = serde_json::from_slice(
            &std::fs::read(&ids_path)
                .with_context(|| format!("failed to read {}", ids_path.display()))?,
        )
        .context("malformed id artifact")?;

        match Self::new(index, ids) {
            Ok(loaded) => Ok(Some(loaded)),
            Err(err) => {
                warn!(language, error = %err, "dropping misaligned persisted index");
                Ok(None)
            }
        }
    }
}

pub(crate) fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, payload)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn unit_row(values: &[f32]) -> Vec<f32> {
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    fn matrix(rows: &[Vec<f32>]) -> Array2<f32> {
        let dim = rows[0].len();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), dim), flat).unwrap()
    }

    #[test]
    fn small_corpus_uses_flat_index() {
        let vectors = matrix(&[unit_row(&[1.0, 0.0]), unit_row(&[0.0, 1.0])]);
        let index = AnnIndex::build(vectors, IndexConfig::default());
        assert!(matches!(index, AnnIndex::Flat(_)));
    }

    #[test]
    fn large_corpus_uses_ivf_index() {
        let rows: Vec<Vec<f32>> = (0..64)
            .map(|i| unit_row(&[(i % 8) as f32 + 1.0, (i / 8) as f32 + 1.0]))
            .collect();
        let index = AnnIndex::build(
            matrix(&rows),
            IndexConfig {
                flat_threshold: 10,
                nprobe: 8,
            },
        );
        match &index {
            AnnIndex::Ivf(ivf) => {
                // sqrt(64) = 8, clamped up to the partition minimum.
                assert_eq!(ivf.centroids.nrows(), MIN_PARTITIONS);
            }
            AnnIndex::Flat(_) => panic!("expected IVF index"),
        }
    }

    #[test]
    fn query_ranks_by_inner_product() {
        let vectors = matrix(&[
            unit_row(&[1.0, 0.0]),
            unit_row(&[0.7, 0.7]),
            unit_row(&[0.0, 1.0]),
        ]);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let index = LanguageIndex::new(
            AnnIndex::build(vectors, IndexConfig::default()),
            ids.clone(),
        )
        .unwrap();

        let query = Array1::from_vec(unit_row(&[1.0, 0.0]));
        let results = index.query(&query.view(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ids[0]);
        assert_eq!(results[1].0, ids[1]);
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn misaligned_ids_are_rejected_at_construction() {
        let vectors = matrix(&[unit_row(&[1.0, 0.0])]);
        let index = AnnIndex::build(vectors, IndexConfig::default());
        assert!(LanguageIndex::new(index, vec![Uuid::new_v4(), Uuid::new_v4()]).is_err());
    }

    #[test]
    fn persist_load_returns_identical_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<f32>> = (0..32)
            .map(|i| unit_row(&[(i as f32).cos(), (i as f32).sin()]))
            .collect();
        let ids: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();
        let index = LanguageIndex::new(
            AnnIndex::build(
                matrix(&rows),
                IndexConfig {
                    flat_threshold: 10,
                    nprobe: 4,
                },
            ),
            ids,
        )
        .unwrap();
        index.persist(dir.path(), "english").unwrap();

        let loaded = LanguageIndex::load(dir.path(), "english")
            .unwrap()
            .expect("persisted index");
        assert_eq!(loaded.len(), index.len());

        let query = Array1::from_vec(unit_row(&[0.5, 0.8]));
        assert_eq!(index.query(&query.view(), 5), loaded.query(&query.view(), 5));
    }

    #[test]
    fn load_missing_language_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LanguageIndex::load(dir.path(), "klingon").unwrap().is_none());
    }
}
