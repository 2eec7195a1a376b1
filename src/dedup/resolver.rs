//! Duplicate-pair reporting and greedy reduction.

use super::corpus::PromptCorpus;
use super::tfidf::{SimilarityMatrix, similarity, similarity_with_progress};
use crate::models::{PrefgenError, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::debug;

/// Two documents whose similarity reaches the threshold, with `i < j`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DuplicatePair {
    pub i: usize,
    pub j: usize,
    pub score: f64,
}

/// A document dropped by [`reduce`], with the kept document that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Redundant {
    pub index: usize,
    pub anchor: usize,
    pub score: f64,
}

/// Outcome of a reduction: kept indices ascending, dropped ones ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reduction {
    pub kept: Vec<usize>,
    pub redundant: Vec<Redundant>,
}

impl Reduction {
    pub fn kept_len(&self) -> usize {
        self.kept.len()
    }

    pub fn removed_len(&self) -> usize {
        self.redundant.len()
    }
}

/// All pairs `i < j` with similarity `>= threshold`, ordered by `(i, j)`.
pub fn find_pairs(matrix: &SimilarityMatrix, threshold: f64) -> Vec<DuplicatePair> {
    let n = matrix.len();
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let score = matrix.get(i, j);
            if score >= threshold {
                pairs.push(DuplicatePair { i, j, score });
            }
        }
    }
    debug!(documents = n, threshold, pairs = pairs.len(), "Found duplicate pairs");
    pairs
}

/// Greedy first-wins reduction over a precomputed matrix.
///
/// Documents are visited in index order. A visited document that is still
/// unremoved is kept, and every later unremoved document whose similarity
/// to it is `>= threshold` is removed. Removal is not transitive: a document
/// only similar to a removed one survives.
pub fn reduce_matrix(matrix: &SimilarityMatrix, threshold: f64) -> Reduction {
    let n = matrix.len();
    let mut removed_by: Vec<Option<(usize, f64)>> = vec![None; n];
    let mut kept = Vec::new();

    for i in 0..n {
        if removed_by[i].is_some() {
            continue;
        }
        kept.push(i);
        for j in (i + 1)..n {
            if removed_by[j].is_some() {
                continue;
            }
            let score = matrix.get(i, j);
            if score >= threshold {
                removed_by[j] = Some((i, score));
            }
        }
    }

    let redundant = removed_by
        .into_iter()
        .enumerate()
        .filter_map(|(index, hit)| {
            hit.map(|(anchor, score)| Redundant {
                index,
                anchor,
                score,
            })
        })
        .collect();

    Reduction { kept, redundant }
}

/// Compute similarity over `corpus` and reduce it until stable.
///
/// The first pass is [`reduce_matrix`] over the whole corpus. TF-IDF is then
/// re-fitted on the survivors and reduced again, until a pass removes
/// nothing. Re-fitting shifts idf weights, so survivors of one pass can
/// reach the threshold in the next. The kept texts, reduced again at the
/// same threshold, keep every item.
pub fn reduce(corpus: &PromptCorpus, threshold: f64) -> Result<Reduction> {
    reduce_with_progress(corpus, threshold, None)
}

/// Same as [`reduce`], ticking `progress` during the first pass.
pub fn reduce_with_progress(
    corpus: &PromptCorpus,
    threshold: f64,
    progress: Option<&ProgressBar>,
) -> Result<Reduction> {
    let matrix = similarity_with_progress(corpus, progress)?;
    let mut reduction = reduce_matrix(&matrix, threshold);
    let mut removed = reduction.removed_len();
    let mut passes = 1;

    while removed > 0 {
        let survivors = corpus.select(&reduction.kept);
        let matrix = match similarity(&survivors) {
            Ok(matrix) => matrix,
            Err(PrefgenError::InsufficientCorpus { .. }) => break,
            Err(e) => return Err(e),
        };
        let pass = reduce_matrix(&matrix, threshold);
        passes += 1;
        removed = pass.removed_len();

        // Pass indices are positions in `survivors`; map them back.
        let previous = std::mem::take(&mut reduction.kept);
        reduction
            .redundant
            .extend(pass.redundant.iter().map(|r| Redundant {
                index: previous[r.index],
                anchor: previous[r.anchor],
                score: r.score,
            }));
        reduction.kept = pass.kept.iter().map(|&i| previous[i]).collect();
    }
    reduction.redundant.sort_by_key(|r| r.index);

    debug!(
        documents = corpus.len(),
        kept = reduction.kept_len(),
        passes,
        "Reduced corpus"
    );
    Ok(reduction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrefgenError;

    fn hiking_corpus() -> PromptCorpus {
        PromptCorpus::from_texts([
            "I love hiking in the mountains",
            "I love hiking in the mountains very much",
            "The stock market fell today",
        ])
    }

    #[test]
    fn test_reduce_keeps_first_of_similar_pair() {
        let reduction = reduce(&hiking_corpus(), 0.5).unwrap();
        assert_eq!(reduction.kept, vec![0, 2]);
        assert_eq!(reduction.redundant.len(), 1);
        assert_eq!(reduction.redundant[0].index, 1);
        assert_eq!(reduction.redundant[0].anchor, 0);
    }

    #[test]
    fn test_find_pairs_reports_single_pair() {
        let matrix = similarity(&hiking_corpus()).unwrap();
        let pairs = find_pairs(&matrix, 0.5);
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].i, pairs[0].j), (0, 1));
        assert!(pairs[0].score > 0.75);
    }

    #[test]
    fn test_threshold_above_one_keeps_everything() {
        let matrix = similarity(&hiking_corpus()).unwrap();
        assert!(find_pairs(&matrix, 1.1).is_empty());

        let reduction = reduce_matrix(&matrix, 1.1);
        assert_eq!(reduction.kept, vec![0, 1, 2]);
        assert!(reduction.redundant.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let matrix = SimilarityMatrix::from_fn(2, |_, _| 0.9);
        assert_eq!(find_pairs(&matrix, 0.9).len(), 1);
        assert_eq!(reduce_matrix(&matrix, 0.9).kept, vec![0]);
    }

    #[test]
    fn test_removal_is_not_transitive() {
        // 0~1 and 1~2 are similar, 0 and 2 are not.
        let scores = [[1.0, 0.8, 0.1], [0.8, 1.0, 0.8], [0.1, 0.8, 1.0]];
        let matrix = SimilarityMatrix::from_fn(3, |i, j| scores[i][j]);
        let reduction = reduce_matrix(&matrix, 0.5);
        assert_eq!(reduction.kept, vec![0, 2]);
        assert_eq!(reduction.redundant[0].index, 1);
    }

    #[test]
    fn test_kept_set_has_no_pair_above_threshold() {
        let corpus = PromptCorpus::from_texts([
            "How do I apologize to a friend I hurt",
            "How do I apologize to a friend that I hurt badly",
            "What is the best way to apologize to a friend I hurt",
            "Explain how vaccines train the immune system",
            "Explain how vaccines train the immune system to respond",
            "Write a poem about the sea",
        ]);
        let matrix = similarity(&corpus).unwrap();
        let threshold = 0.6;
        let reduction = reduce_matrix(&matrix, threshold);

        for (a, &i) in reduction.kept.iter().enumerate() {
            for &j in &reduction.kept[a + 1..] {
                assert!(matrix.get(i, j) < threshold);
            }
        }
        assert_eq!(
            reduction.kept_len() + reduction.removed_len(),
            corpus.len()
        );
        assert_eq!(reduction.kept[0], 0);
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let corpus = PromptCorpus::from_texts([
            "Should I tell my boss about my coworker's mistake",
            "Should I tell my boss about a coworker mistake",
            "Is honesty always the best policy at work",
            "Is honesty always the best policy",
            "Describe the water cycle for a child",
        ]);
        let matrix = similarity(&corpus).unwrap();
        let first = reduce_matrix(&matrix, 0.5);

        let sub = matrix.restrict(&first.kept);
        let second = reduce_matrix(&sub, 0.5);
        assert_eq!(second.kept, (0..first.kept.len()).collect::<Vec<_>>());
        assert!(second.redundant.is_empty());
    }

    #[test]
    fn test_reduce_on_kept_corpus_keeps_everything() {
        let corpus = hiking_corpus();
        let first = reduce(&corpus, 0.5).unwrap();

        let kept_texts: Vec<String> = first
            .kept
            .iter()
            .map(|&i| corpus.get(i).unwrap().text.clone())
            .collect();
        let second = reduce(&PromptCorpus::from_texts(kept_texts), 0.5).unwrap();
        assert_eq!(second.kept, vec![0, 1]);
    }

    #[test]
    fn test_reduce_refits_until_stable() {
        let corpus = PromptCorpus::from_texts([
            "gamma beta beta sigma",
            "sigma alpha",
            "beta alpha beta",
            "alpha alpha omega",
        ]);
        // A single pass keeps three; re-fitted on those, 0 and 3 collide.
        let single = reduce_matrix(&similarity(&corpus).unwrap(), 0.5);
        assert_eq!(single.kept, vec![0, 1, 3]);

        let reduction = reduce(&corpus, 0.5).unwrap();
        assert_eq!(reduction.kept, vec![0, 1]);
        assert_eq!(reduction.kept_len() + reduction.removed_len(), corpus.len());

        let again = reduce(&corpus.select(&reduction.kept), 0.5).unwrap();
        assert_eq!(again.kept, (0..reduction.kept_len()).collect::<Vec<_>>());
        assert!(again.redundant.is_empty());
    }

    #[test]
    fn test_reduce_is_stable_on_random_corpora() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let vocab = ["alpha", "beta", "gamma", "delta", "sigma", "omega", "kappa"];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let docs = rng.random_range(3..9);
            let texts: Vec<String> = (0..docs)
                .map(|_| {
                    let words = rng.random_range(1..6);
                    (0..words)
                        .map(|_| vocab[rng.random_range(0..vocab.len())])
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            let corpus = PromptCorpus::from_texts(texts);

            for threshold in [0.3, 0.5, 0.8] {
                let Ok(first) = reduce(&corpus, threshold) else {
                    continue;
                };
                let kept = corpus.select(&first.kept);
                let matrix = match similarity(&kept) {
                    Ok(matrix) => matrix,
                    Err(_) => continue,
                };
                assert!(
                    find_pairs(&matrix, threshold).is_empty(),
                    "kept texts still reach {threshold}: {:?}",
                    kept.entries()
                );
                let second = reduce_matrix(&matrix, threshold);
                assert_eq!(second.kept_len(), kept.len());
            }
        }
    }

    #[test]
    fn test_reduce_reports_redundant_with_original_indices() {
        let corpus = PromptCorpus::from_texts([
            "gamma beta beta sigma",
            "sigma alpha",
            "beta alpha beta",
            "alpha alpha omega",
        ]);
        let reduction = reduce(&corpus, 0.5).unwrap();
        for r in &reduction.redundant {
            assert!(r.anchor < corpus.len() && r.index < corpus.len());
            assert!(reduction.kept.contains(&r.anchor) || reduction.redundant.iter().any(|o| o.index == r.anchor));
        }
        let indices: Vec<usize> = reduction.redundant.iter().map(|r| r.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn test_reduce_propagates_insufficient_corpus() {
        let corpus = PromptCorpus::from_texts(["lonely prompt"]);
        assert!(matches!(
            reduce(&corpus, 0.5),
            Err(PrefgenError::InsufficientCorpus { .. })
        ));
    }
}
