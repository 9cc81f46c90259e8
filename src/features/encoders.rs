//! Categorical and numeric feature extractors: multi-label genre encoding,
//! single-category author encoding, and min-max year scaling.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::SparseVec;

/// Multi-label binarizer over genre sets. Unknown genres at transform time
/// are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenreBinarizer {
    classes: FxHashMap<String, usize>,
}

impl GenreBinarizer {
    #[must_use]
    pub fn width(&self) -> usize {
        self.classes.len()
    }

    pub fn fit<S: AsRef<str>>(&mut self, genre_lists: &[Vec<S>]) {
        let mut unique: Vec<String> = genre_lists
            .iter()
            .flatten()
            .map(|g| g.as_ref().trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
        unique.sort_unstable();
        unique.dedup();
        self.classes = unique
            .into_iter()
            .enumerate()
            .map(|(idx, genre)| (genre, idx))
            .collect();
    }

    #[must_use]
    pub fn transform<S: AsRef<str>>(&self, genres: &[S]) -> SparseVec {
        let mut row: SparseVec = genres
            .iter()
            .filter_map(|g| self.classes.get(g.as_ref().trim()).map(|&idx| (idx, 1.0)))
            .collect();
        row.sort_unstable_by_key(|(idx, _)| *idx);
        row.dedup_by_key(|(idx, _)| *idx);
        row
    }
}

/// One-hot encoder over the author category. Unknown authors produce an
/// all-zero block rather than an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorEncoder {
    categories: FxHashMap<String, usize>,
}

impl AuthorEncoder {
    #[must_use]
    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn fit<S: AsRef<str>>(&mut self, authors: &[S]) {
        let mut unique: Vec<String> = authors
            .iter()
            .map(|a| a.as_ref().trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        unique.sort_unstable();
        unique.dedup();
        self.categories = unique
            .into_iter()
            .enumerate()
            .map(|(idx, author)| (author, idx))
            .collect();
    }

    #[must_use]
    pub fn transform(&self, author: &str) -> SparseVec {
        self.categories
            .get(author.trim())
            .map(|&idx| vec![(idx, 1.0)])
            .unwrap_or_default()
    }
}

/// Min-max scaler for the publication year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearScaler {
    min: f32,
    max: f32,
}

impl Default for YearScaler {
    fn default() -> Self {
        Self { min: 0.0, max: 0.0 }
    }
}

impl YearScaler {
    pub fn fit(&mut self, years: &[i32]) {
        self.min = years.iter().copied().min().unwrap_or(0) as f32;
        self.max = years.iter().copied().max().unwrap_or(0) as f32;
    }

    #[must_use]
    pub fn transform(&self, year: i32) -> f32 {
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0.0;
        }
        (year as f32 - self.min) / range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_binarizer_indices_are_stable() {
        let mut binarizer = GenreBinarizer::default();
        binarizer.fit(&[vec!["Fantasy", "Adventure"], vec!["Romance", "Fantasy"]]);
        assert_eq!(binarizer.width(), 3);
        // Alphabetical: Adventure=0, Fantasy=1, Romance=2.
        assert_eq!(binarizer.transform(&["Fantasy"]), vec![(1, 1.0)]);
        assert_eq!(
            binarizer.transform(&["Romance", "Adventure"]),
            vec![(0, 1.0), (2, 1.0)]
        );
    }

    #[test]
    fn unknown_genre_is_ignored() {
        let mut binarizer = GenreBinarizer::default();
        binarizer.fit(&[vec!["Fantasy"]]);
        assert!(binarizer.transform(&["Horror"]).is_empty());
    }

    #[test]
    fn author_encoder_handles_unknown() {
        let mut encoder = AuthorEncoder::default();
        encoder.fit(&["Ursula K. Le Guin", "Ted Chiang"]);
        assert_eq!(encoder.width(), 2);
        assert_eq!(encoder.transform("Ted Chiang"), vec![(0, 1.0)]);
        assert!(encoder.transform("Nobody").is_empty());
    }

    #[test]
    fn year_scaler_maps_to_unit_range() {
        let mut scaler = YearScaler::default();
        scaler.fit(&[1950, 2000]);
        assert!((scaler.transform(1950) - 0.0).abs() < f32::EPSILON);
        assert!((scaler.transform(2000) - 1.0).abs() < f32::EPSILON);
        assert!((scaler.transform(1975) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn degenerate_year_range_is_zero() {
        let mut scaler = YearScaler::default();
        scaler.fit(&[1999]);
        assert!((scaler.transform(1999) - 0.0).abs() < f32::EPSILON);
    }
}
