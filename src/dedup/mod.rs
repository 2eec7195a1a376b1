//! Near-duplicate resolver.
//!
//! Scores every prompt pair by TF-IDF cosine similarity, then either
//! reports the pairs at or above a threshold or greedily reduces the
//! corpus so that no two kept prompts reach it.

mod corpus;
mod resolver;
mod tfidf;

pub use corpus::{CorpusEntry, PromptCorpus};
pub use resolver::{
    DuplicatePair, Reduction, Redundant, find_pairs, reduce, reduce_matrix, reduce_with_progress,
};
pub use tfidf::{
    SimilarityMatrix, SparseVector, TfidfModel, similarity, similarity_with_progress, tokenize,
};
