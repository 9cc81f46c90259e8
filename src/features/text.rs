//! Text-frequency vectorizer over book summaries.
//!
//! Fit builds a capped vocabulary from a representative sample; transform
//! produces sparse tf-idf rows with smoothed idf and L2 row normalization.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use super::SparseVec;

/// Common English stop words, excluded from the vocabulary.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most",
    "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
    "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.len() > 1 && !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Fitted tf-idf vectorizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    max_features: usize,
    vocabulary: FxHashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    #[must_use]
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vocabulary: FxHashMap::default(),
            idf: Vec::new(),
        }
    }

    /// Number of vocabulary terms, which is the width of the tf-idf block.
    #[must_use]
    pub fn width(&self) -> usize {
        self.vocabulary.len()
    }

    /// Build the vocabulary and idf table from a document sample.
    pub fn fit(&mut self, documents: &[&str]) {
        let mut term_counts: FxHashMap<String, u64> = FxHashMap::default();
        let mut doc_frequency: FxHashMap<String, u64> = FxHashMap::default();

        for doc in documents {
            let tokens = tokenize(doc);
            let mut seen: FxHashMap<&str, ()> = FxHashMap::default();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
                if seen.insert(token.as_str(), ()).is_none() {
                    *doc_frequency.entry(token.clone()).or_insert(0) += 1;
                }
            }
        }

        // Cap the vocabulary at the most frequent terms, then fix term order
        // alphabetically so indices are deterministic.
        let mut terms: Vec<(String, u64)> = term_counts.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(self.max_features);
        let mut selected: Vec<String> = terms.into_iter().map(|(term, _)| term).collect();
        selected.sort_unstable();

        let doc_count = documents.len() as f32;
        self.vocabulary = selected
            .iter()
            .enumerate()
            .map(|(idx, term)| (term.clone(), idx))
            .collect();
        self.idf = selected
            .iter()
            .map(|term| {
                let df = doc_frequency.get(term).copied().unwrap_or(0) as f32;
                // Smoothed idf keeps unseen-in-some-doc terms finite.
                ((1.0 + doc_count) / (1.0 + df)).ln() + 1.0
            })
            .collect();
    }

    /// Transform one document into a sparse L2-normalized tf-idf row.
    #[must_use]
    pub fn transform(&self, document: &str) -> SparseVec {
        let mut counts: FxHashMap<usize, f32> = FxHashMap::default();
        for token in tokenize(document) {
            if let Some(&idx) = self.vocabulary.get(&token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut row: SparseVec = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();
        row.sort_unstable_by_key(|(idx, _)| *idx);

        let norm: f32 = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, v) in &mut row {
                *v /= norm;
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_builds_capped_vocabulary() {
        let mut vectorizer = TfidfVectorizer::new(2);
        vectorizer.fit(&[
            "dragons and wizards fight dragons",
            "wizards study magic",
            "dragons sleep",
        ]);
        assert_eq!(vectorizer.width(), 2);
        // "dragons" (3 occurrences) and "wizards" (2) survive the cap.
        assert!(vectorizer.vocabulary.contains_key("dragons"));
        assert!(vectorizer.vocabulary.contains_key("wizards"));
    }

    #[test]
    fn transform_is_l2_normalized() {
        let mut vectorizer = TfidfVectorizer::new(100);
        vectorizer.fit(&["the dragon kingdom burns", "a quiet kingdom"]);
        let row = vectorizer.transform("dragon kingdom");
        let norm: f32 = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn stop_words_and_unknown_terms_are_dropped() {
        let mut vectorizer = TfidfVectorizer::new(100);
        vectorizer.fit(&["space pirates raid stations"]);
        assert!(vectorizer.transform("the and of").is_empty());
        assert!(vectorizer.transform("submarine").is_empty());
    }

    #[test]
    fn empty_document_is_empty_row() {
        let mut vectorizer = TfidfVectorizer::new(100);
        vectorizer.fit(&["some words here"]);
        assert!(vectorizer.transform("").is_empty());
    }
}
