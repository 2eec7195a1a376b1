//! Prompt corpus: the read-only input of the near-duplicate resolver.

use crate::store::LoadedRecord;
use serde::Serialize;

/// One document of the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusEntry {
    /// Where the text came from (e.g. `rlhf_batch_01.json:3`)
    pub source: String,
    /// Text compared for similarity
    pub text: String,
}

/// Ordered sequence of `(source, text)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptCorpus {
    entries: Vec<CorpusEntry>,
}

impl PromptCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a corpus from bare texts; sources are their indices.
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        let mut corpus = Self::new();
        for (i, text) in texts.into_iter().enumerate() {
            corpus.push(i.to_string(), text);
        }
        corpus
    }

    /// Build a corpus from loaded records, reading `field` from each.
    ///
    /// With `skip_empty`, records whose trimmed field is empty or missing
    /// are left out; otherwise they become empty documents so that corpus
    /// indices stay aligned with `records`.
    pub fn from_records(records: &[LoadedRecord], field: &str, skip_empty: bool) -> Self {
        let mut corpus = Self::new();
        for record in records {
            let text = record
                .value
                .get(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim();
            if skip_empty && text.is_empty() {
                continue;
            }
            corpus.push(record.source(), text);
        }
        corpus
    }

    pub fn push(&mut self, source: impl Into<String>, text: impl Into<String>) {
        self.entries.push(CorpusEntry {
            source: source.into(),
            text: text.into(),
        });
    }

    /// Sub-corpus of the entries at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            entries: indices
                .iter()
                .filter_map(|&i| self.entries.get(i).cloned())
                .collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&CorpusEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_records_skip_empty() {
        let records = vec![
            LoadedRecord::new("a.json", 0, json!({"prompt": "  hello there "})),
            LoadedRecord::new("a.json", 1, json!({"prompt": ""})),
            LoadedRecord::new("b.json", 0, json!({"other": 1})),
        ];

        let skipped = PromptCorpus::from_records(&records, "prompt", true);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped.get(0).unwrap().text, "hello there");
        assert_eq!(skipped.get(0).unwrap().source, "a.json:0");

        let aligned = PromptCorpus::from_records(&records, "prompt", false);
        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned.get(2).unwrap().text, "");
    }
}
