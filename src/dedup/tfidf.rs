//! TF-IDF vector space and pairwise cosine similarity.
//!
//! Weighting follows the common defaults for short prompts:
//! - terms are lowercased runs of two or more word characters
//! - tf is the raw count in the document
//! - idf is smoothed: `ln((1 + n) / (1 + df)) + 1`
//! - vectors are L2-normalized, so cosine similarity is a dot product
//!
//! Memory is O(N²): the full upper triangle is materialized. This is the
//! scalability ceiling of the resolver (a few tens of thousands of prompts).

use super::corpus::PromptCorpus;
use crate::models::{PrefgenError, Result};
use indicatif::ProgressBar;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::debug;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("static pattern"));

/// Split text into lowercase terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// L2-normalized sparse vector, entries sorted by term index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    /// Dot product of two sorted sparse vectors.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.entries.len() && j < other.entries.len() {
            let (ti, wi) = self.entries[i];
            let (tj, wj) = other.entries[j];
            match ti.cmp(&tj) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += wi * wj;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Vocabulary and idf weights fitted on a corpus.
#[derive(Debug, Clone)]
pub struct TfidfModel {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfModel {
    /// Fit on tokenized documents and return one vector per document.
    pub fn fit_transform(documents: &[Vec<String>]) -> (Self, Vec<SparseVector>) {
        let n = documents.len() as f64;

        // Sorted vocabulary keeps term indices stable across runs.
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for doc in documents {
            let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        for (index, (term, df)) in document_frequency.into_iter().enumerate() {
            vocabulary.insert(term.to_string(), index);
            idf.push(((1.0 + n) / (1.0 + df as f64)).ln() + 1.0);
        }

        let model = Self { vocabulary, idf };
        let vectors = documents.iter().map(|doc| model.transform(doc)).collect();
        (model, vectors)
    }

    /// Vectorize one tokenized document; unknown terms are ignored.
    pub fn transform(&self, tokens: &[String]) -> SparseVector {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for token in tokens {
            if let Some(&index) = self.vocabulary.get(token) {
                *counts.entry(index).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(index, tf)| (index, tf as f64 * self.idf[index]))
            .collect();

        let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in entries.iter_mut() {
                *w /= norm;
            }
        }

        SparseVector { entries }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.idf.len()
    }
}

/// Symmetric N×N similarity matrix; only the strict upper triangle is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    upper: Vec<f64>,
}

impl SimilarityMatrix {
    /// Build a matrix from a dense similarity function over `n` items.
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut upper = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                upper.push(f(i, j).clamp(0.0, 1.0));
            }
        }
        Self { n, upper }
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Similarity between `i` and `j`; the diagonal is 1 by definition.
    ///
    /// # Panics
    /// If either index is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(i < self.n && j < self.n, "index out of bounds");
        if i == j {
            return 1.0;
        }
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        self.upper[self.offset(a, b)]
    }

    /// Sub-matrix over `indices`, in the given order.
    pub fn restrict(&self, indices: &[usize]) -> SimilarityMatrix {
        SimilarityMatrix::from_fn(indices.len(), |a, b| self.get(indices[a], indices[b]))
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        // Row i starts after rows 0..i, each holding n - 1 - r entries.
        i * self.n - i * (i + 1) / 2 + (j - i - 1)
    }
}

/// Pairwise TF-IDF cosine similarity over a corpus.
///
/// Fails with `InsufficientCorpus` when fewer than two documents contain
/// at least one term.
pub fn similarity(corpus: &PromptCorpus) -> Result<SimilarityMatrix> {
    similarity_with_progress(corpus, None)
}

/// Same as [`similarity`], ticking `progress` once per row.
pub fn similarity_with_progress(
    corpus: &PromptCorpus,
    progress: Option<&ProgressBar>,
) -> Result<SimilarityMatrix> {
    let documents: Vec<Vec<String>> = corpus.texts().map(tokenize).collect();

    let non_empty = documents.iter().filter(|d| !d.is_empty()).count();
    if non_empty < 2 {
        return Err(PrefgenError::InsufficientCorpus { non_empty });
    }

    let (model, vectors) = TfidfModel::fit_transform(&documents);
    debug!(
        documents = documents.len(),
        vocabulary = model.vocabulary_len(),
        "Fitted TF-IDF model"
    );

    let n = vectors.len();
    let mut upper = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            upper.push(vectors[i].dot(&vectors[j]).clamp(0.0, 1.0));
        }
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    Ok(SimilarityMatrix { n, upper })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hiking_corpus() -> PromptCorpus {
        PromptCorpus::from_texts([
            "I love hiking in the mountains",
            "I love hiking in the mountains very much",
            "The stock market fell today",
        ])
    }

    #[test]
    fn test_tokenize_drops_single_chars_and_lowercases() {
        assert_eq!(
            tokenize("I love Hiking, a LOT!"),
            vec!["love", "hiking", "lot"]
        );
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn test_similarity_values_for_hiking_corpus() {
        let matrix = similarity(&hiking_corpus()).unwrap();

        // idf: shared terms ln(4/3)+1, "the" 1.0, unique ln(2)+1
        let shared = (4.0f64 / 3.0).ln() + 1.0;
        let unique = 2.0f64.ln() + 1.0;
        let norm0 = 4.0 * shared * shared + 1.0;
        let norm1 = norm0 + 2.0 * unique * unique;
        let expected = (norm0 / norm1).sqrt();

        assert!((matrix.get(0, 1) - expected).abs() < 1e-9);
        assert!(matrix.get(0, 1) > 0.75);
        assert!(matrix.get(0, 2) < 0.2);
        assert!(matrix.get(1, 2) < 0.2);
    }

    #[test]
    fn test_similarity_is_symmetric_with_unit_diagonal() {
        let corpus = PromptCorpus::from_texts([
            "How do I tell my friend I am hurt",
            "How can I tell a friend that I feel hurt",
            "Is it ethical to lie to protect someone",
            "Explain why lying is sometimes acceptable",
        ]);
        let matrix = similarity(&corpus).unwrap();

        for i in 0..corpus.len() {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..corpus.len() {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((0.0..=1.0).contains(&matrix.get(i, j)));
            }
        }
    }

    #[test]
    fn test_identical_documents_score_one() {
        let corpus = PromptCorpus::from_texts(["same words here", "same words here", "other"]);
        let matrix = similarity(&corpus).unwrap();
        assert!((matrix.get(0, 1) - 1.0).abs() < 1e-12);
        assert!(matrix.get(0, 1) <= 1.0);
    }

    #[test]
    fn test_insufficient_corpus() {
        let single = PromptCorpus::from_texts(["only one prompt"]);
        assert!(matches!(
            similarity(&single),
            Err(PrefgenError::InsufficientCorpus { non_empty: 1 })
        ));

        let blank = PromptCorpus::from_texts(["", "a", "   "]);
        assert!(matches!(
            similarity(&blank),
            Err(PrefgenError::InsufficientCorpus { non_empty: 0 })
        ));
    }

    #[test]
    fn test_empty_document_is_dissimilar_to_everything() {
        let corpus = PromptCorpus::from_texts(["", "cats purr loudly", "cats purr softly"]);
        let matrix = similarity(&corpus).unwrap();
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(matrix.get(0, 2), 0.0);
        assert_eq!(matrix.get(0, 0), 1.0);
    }

    #[test]
    fn test_restrict_preserves_pairwise_values() {
        let matrix = similarity(&hiking_corpus()).unwrap();
        let sub = matrix.restrict(&[0, 2]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.get(0, 1), matrix.get(0, 2));
    }

    #[test]
    fn test_offset_covers_upper_triangle() {
        let matrix = SimilarityMatrix::from_fn(5, |i, j| (i * 10 + j) as f64 / 100.0);
        assert_eq!(matrix.get(0, 1), 0.01);
        assert_eq!(matrix.get(3, 4), 0.34);
        assert_eq!(matrix.get(4, 2), 0.24);
    }
}
