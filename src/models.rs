//! Core data models used throughout docforge.
//!
//! These types represent the documents, chunks and retrieval results that
//! flow through the ingestion and retrieval pipeline.

use serde::Serialize;
use std::path::PathBuf;

/// A source file read from the corpus directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated.
    pub id: String,
    /// Absolute or configured path the text was read from.
    pub path: PathBuf,
    pub text: String,
}

/// Ordered collection of documents, sorted by [`Document::id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    documents: Vec<Document>,
}

impl Corpus {
    pub fn new(mut documents: Vec<Document>) -> Self {
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Self { documents }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<Document> for Corpus {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        Corpus::new(iter.into_iter().collect())
    }
}

/// A chunk of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A passage returned by an index query.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub document_id: String,
    pub chunk_index: i64,
    pub score: f64,
    pub text: String,
}

/// Passages judged relevant to one query, best first.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub passages: Vec<Passage>,
}

impl RetrievalResult {
    /// Passage texts joined by a blank line, ready for prompt substitution.
    pub fn context(&self) -> String {
        self.passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            path: PathBuf::from(id),
            text: text.to_string(),
        }
    }

    #[test]
    fn corpus_is_sorted_by_id() {
        let corpus = Corpus::new(vec![doc("b.txt", "B"), doc("a.txt", "A")]);
        let ids: Vec<&str> = corpus.documents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn context_joins_passages() {
        let result = RetrievalResult {
            query: "q".into(),
            passages: vec![
                Passage {
                    document_id: "a".into(),
                    chunk_index: 0,
                    score: 1.0,
                    text: "first".into(),
                },
                Passage {
                    document_id: "b".into(),
                    chunk_index: 0,
                    score: 0.5,
                    text: "second".into(),
                },
            ],
        };
        assert_eq!(result.context(), "first\n\nsecond");
    }
}
