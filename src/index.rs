//! In-process vector index over the corpus.
//!
//! [`VectorIndex`] is built once from a [`Corpus`] and is read-only
//! afterwards: queries always reflect exactly the corpus it was built from.
//! [`IndexHandle`] owns the lazily-built index for the lifetime of the
//! process and rebuilds it only when asked to.
//!
//! # Retrieval modes
//!
//! | Mode | Scoring |
//! |------|---------|
//! | `semantic` | cosine similarity between query and chunk embeddings |
//! | `keyword` | number of query terms contained in the chunk |
//! | `hybrid` | `(1 - α) × keyword + α × semantic`, both min-max normalised |

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::config::{ApiKey, Config};
use crate::embedding::{cosine_similarity, create_embedder, embed_query, Embedder};
use crate::error::{Error, Result};
use crate::loader::{CorpusSource, DirectorySource};
use crate::models::{Chunk, Corpus, Passage, RetrievalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl RetrievalMode {
    fn needs_embeddings(self) -> bool {
        !matches!(self, RetrievalMode::Keyword)
    }
}

impl FromStr for RetrievalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(RetrievalMode::Keyword),
            "semantic" => Ok(RetrievalMode::Semantic),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(Error::Config(format!(
                "unknown retrieval mode '{}': use keyword, semantic, or hybrid",
                other
            ))),
        }
    }
}

/// Index construction and query parameters.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub hybrid_alpha: f64,
    pub max_tokens: usize,
    pub batch_size: usize,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            mode: config.retrieval.mode.parse()?,
            top_k: config.retrieval.top_k,
            hybrid_alpha: config.retrieval.hybrid_alpha,
            max_tokens: config.chunking.max_tokens,
            batch_size: config.embedding.batch_size,
        })
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Semantic,
            top_k: 2,
            hybrid_alpha: 0.6,
            max_tokens: 512,
            batch_size: 64,
        }
    }
}

struct IndexedChunk {
    chunk: Chunk,
    vector: Option<Vec<f32>>,
}

/// Immutable chunk + embedding index.
///
/// `Send + Sync`; share it behind an `Arc` for concurrent readers.
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: IndexSettings,
    documents: usize,
}

/// Counts reported after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
}

impl VectorIndex {
    /// Chunk and embed every document of `corpus`.
    ///
    /// # Errors
    ///
    /// [`Error::Retrieval`] if the corpus has nothing to index or the
    /// embedding backend fails; [`Error::Config`] if the mode needs
    /// embeddings and no embedder is given.
    pub async fn build(
        corpus: &Corpus,
        embedder: Option<Arc<dyn Embedder>>,
        settings: IndexSettings,
    ) -> Result<Self> {
        if settings.mode.needs_embeddings() && embedder.is_none() {
            return Err(Error::Config(
                "semantic and hybrid retrieval require an embedding provider".to_string(),
            ));
        }

        let chunks: Vec<Chunk> = corpus
            .documents()
            .iter()
            .flat_map(|doc| chunk_text(&doc.id, &doc.text, settings.max_tokens))
            .collect();

        if chunks.is_empty() {
            return Err(Error::Retrieval(
                "corpus contains no text to index".to_string(),
            ));
        }

        let vectors = match (&embedder, settings.mode.needs_embeddings()) {
            (Some(embedder), true) => {
                Some(embed_chunks(embedder.as_ref(), &chunks, settings.batch_size).await?)
            }
            _ => None,
        };

        let entries: Vec<IndexedChunk> = match vectors {
            Some(vectors) => chunks
                .into_iter()
                .map(|chunk| {
                    let vector = vectors.get(&chunk.hash).cloned();
                    IndexedChunk { chunk, vector }
                })
                .collect(),
            None => chunks
                .into_iter()
                .map(|chunk| IndexedChunk {
                    chunk,
                    vector: None,
                })
                .collect(),
        };

        let index = Self {
            entries,
            embedder,
            settings,
            documents: corpus.len(),
        };
        let stats = index.stats();
        info!(
            documents = stats.documents,
            chunks = stats.chunks,
            embedded = stats.embedded,
            "index built"
        );
        Ok(index)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.documents,
            chunks: self.entries.len(),
            embedded: self.entries.iter().filter(|e| e.vector.is_some()).count(),
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Return the `top_k` passages most relevant to `question`.
    pub async fn query(&self, question: &str) -> Result<RetrievalResult> {
        self.query_with_limit(question, self.settings.top_k).await
    }

    /// Like [`query`](Self::query) with an explicit result limit.
    ///
    /// # Errors
    ///
    /// [`Error::Retrieval`] when the question is blank or the query cannot
    /// be embedded. An embedding failure is never turned into an empty
    /// context.
    pub async fn query_with_limit(&self, question: &str, limit: usize) -> Result<RetrievalResult> {
        if question.trim().is_empty() {
            return Err(Error::Retrieval("query is empty".to_string()));
        }

        let keyword = if self.settings.mode != RetrievalMode::Semantic {
            self.keyword_scores(question)
        } else {
            HashMap::new()
        };

        let semantic = if self.settings.mode.needs_embeddings() {
            let embedder = self.embedder.as_ref().ok_or_else(|| {
                Error::Retrieval("index has no embedding provider".to_string())
            })?;
            let query_vec = embed_query(embedder.as_ref(), question)
                .await
                .map_err(|e| Error::Retrieval(format!("{:#}", e)))?;
            self.semantic_scores(&query_vec)
        } else {
            HashMap::new()
        };

        let alpha = match self.settings.mode {
            RetrievalMode::Keyword => 0.0,
            RetrievalMode::Semantic => 1.0,
            RetrievalMode::Hybrid => self.settings.hybrid_alpha,
        };

        let norm_keyword = normalize_scores(&keyword);
        let norm_semantic = normalize_scores(&semantic);

        let mut passages: Vec<Passage> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| keyword.contains_key(i) || semantic.contains_key(i))
            .map(|(i, entry)| {
                let k = norm_keyword.get(&i).copied().unwrap_or(0.0);
                let v = norm_semantic.get(&i).copied().unwrap_or(0.0);
                Passage {
                    document_id: entry.chunk.document_id.clone(),
                    chunk_index: entry.chunk.chunk_index,
                    score: (1.0 - alpha) * k + alpha * v,
                    text: entry.chunk.text.clone(),
                }
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.document_id.cmp(&b.document_id))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        passages.truncate(limit);

        debug!(query = question, passages = passages.len(), "index query");
        Ok(RetrievalResult {
            query: question.to_string(),
            passages,
        })
    }

    /// Term-overlap scores for chunks containing at least one query term.
    fn keyword_scores(&self, question: &str) -> HashMap<usize, f64> {
        let query_lower = question.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();

        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let text_lower = entry.chunk.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                (matches > 0).then_some((i, matches as f64))
            })
            .collect()
    }

    fn semantic_scores(&self, query_vec: &[f32]) -> HashMap<usize, f64> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                entry
                    .vector
                    .as_ref()
                    .map(|v| (i, cosine_similarity(query_vec, v) as f64))
            })
            .collect()
    }
}

/// Embed unique chunk texts in batches, keyed by content hash.
async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<HashMap<String, Vec<f32>>> {
    let mut unique: Vec<(&str, &str)> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for chunk in chunks {
        if seen.insert(chunk.hash.as_str()) {
            unique.push((chunk.hash.as_str(), chunk.text.as_str()));
        }
    }

    let mut vectors = HashMap::with_capacity(unique.len());
    for batch in unique.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.to_string()).collect();
        let embedded = embedder
            .embed(&texts)
            .await
            .map_err(|e| Error::Retrieval(format!("embedding failed: {:#}", e)))?;
        if embedded.len() != batch.len() {
            return Err(Error::Retrieval(format!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        for ((hash, _), vector) in batch.iter().zip(embedded) {
            vectors.insert(hash.to_string(), vector);
        }
        debug!(embedded = vectors.len(), total = unique.len(), "embedding chunks");
    }
    Ok(vectors)
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
fn normalize_scores(scores: &HashMap<usize, f64>) -> HashMap<usize, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }

    let s_min = scores.values().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|(&i, &s)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            };
            (i, norm)
        })
        .collect()
}

/// Process-lifetime owner of the index.
///
/// The index is built on the first [`get`](IndexHandle::get) and reused
/// until [`rebuild`](IndexHandle::rebuild) is called. The lock guards only
/// the slot; readers clone the inner `Arc` and query without holding it.
pub struct IndexHandle {
    source: Box<dyn CorpusSource>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: IndexSettings,
    slot: RwLock<Option<Arc<VectorIndex>>>,
}

impl IndexHandle {
    pub fn new(
        source: Box<dyn CorpusSource>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            source,
            embedder,
            settings,
            slot: RwLock::new(None),
        }
    }

    /// Return the current index, building it on first use.
    pub async fn get(&self) -> Result<Arc<VectorIndex>> {
        if let Some(index) = self.slot.read().await.as_ref() {
            return Ok(Arc::clone(index));
        }

        let mut slot = self.slot.write().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.build().await?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Reload the corpus and replace the cached index.
    ///
    /// On failure the previous index (if any) stays in place.
    pub async fn rebuild(&self) -> Result<Arc<VectorIndex>> {
        let index = Arc::new(self.build().await?);
        *self.slot.write().await = Some(Arc::clone(&index));
        Ok(index)
    }

    pub async fn is_built(&self) -> bool {
        self.slot.read().await.is_some()
    }

    async fn build(&self) -> Result<VectorIndex> {
        info!(source = %self.source.describe(), "loading corpus");
        let corpus = self.source.load()?;
        VectorIndex::build(&corpus, self.embedder.clone(), self.settings.clone()).await
    }
}

/// Build an [`IndexHandle`] over the configured corpus directory.
///
/// `mode` overrides `retrieval.mode`. Keyword retrieval never constructs an
/// embedder, so it works without a credential.
pub fn handle_from_config(
    config: &Config,
    mode: Option<RetrievalMode>,
    api_key: Option<&ApiKey>,
) -> Result<IndexHandle> {
    let mut settings = IndexSettings::from_config(config)?;
    if let Some(mode) = mode {
        settings.mode = mode;
    }
    let embedder = if settings.mode.needs_embeddings() {
        create_embedder(&config.embedding, api_key).map_err(|e| Error::Config(format!("{:#}", e)))?
    } else {
        None
    };
    Ok(IndexHandle::new(
        Box::new(DirectorySource::new(config.corpus.clone())),
        embedder,
        settings,
    ))
}

/// `docforge index`: build the index once and report its size.
pub async fn run_index(config: &Config, api_key: Option<&ApiKey>) -> anyhow::Result<()> {
    let handle = handle_from_config(config, None, api_key)?;
    let index = handle.get().await?;
    let stats = index.stats();

    println!("Index built from {}", config.corpus.dir.display());
    println!("  documents: {}", stats.documents);
    println!("  chunks: {}", stats.chunks);
    println!("  embedded: {}", stats.embedded);
    Ok(())
}

/// `docforge search`: print the passages a question would retrieve.
pub async fn run_search(
    config: &Config,
    api_key: Option<&ApiKey>,
    query: &str,
    mode: Option<RetrievalMode>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let handle = handle_from_config(config, mode, api_key)?;
    let index = handle.get().await?;
    let limit = limit.unwrap_or(index.settings().top_k);
    let result = index.query_with_limit(query, limit).await?;

    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, passage) in result.passages.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            passage.score,
            passage.document_id,
            passage.chunk_index
        );
        println!("    excerpt: \"{}\"", excerpt(&passage.text, 240));
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Document;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bag-of-words embedder over a small fixed vocabulary, matched by prefix.
    pub(crate) struct VocabEmbedder {
        pub vocab: Vec<&'static str>,
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl VocabEmbedder {
        pub(crate) fn new(vocab: Vec<&'static str>) -> Self {
            Self {
                vocab,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Embedder for VocabEmbedder {
        fn model_name(&self) -> &str {
            "vocab"
        }

        fn dims(&self) -> usize {
            self.vocab.len()
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("embedding service unreachable");
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    self.vocab
                        .iter()
                        .map(|stem| lower.matches(stem).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    pub(crate) fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            path: PathBuf::from(id),
            text: text.to_string(),
        }
    }

    fn settings(mode: RetrievalMode) -> IndexSettings {
        IndexSettings {
            mode,
            ..IndexSettings::default()
        }
    }

    #[tokio::test]
    async fn semantic_query_returns_best_passage() {
        let corpus = Corpus::new(vec![
            doc("ops.txt", "Rohlik Group operates automated warehouses."),
            doc("hr.txt", "Benefits include meal vouchers and a sick day policy."),
        ]);
        let embedder = Arc::new(VocabEmbedder::new(vec!["automat", "warehouse", "benefit"]));
        let index = VectorIndex::build(&corpus, Some(embedder), settings(RetrievalMode::Semantic))
            .await
            .unwrap();

        let result = index.query("automation").await.unwrap();
        assert_eq!(result.passages[0].document_id, "ops.txt");
        assert!(result.context().contains("automated warehouses"));
    }

    #[tokio::test]
    async fn identical_chunks_are_embedded_once() {
        let corpus = Corpus::new(vec![doc("a.txt", "Same text."), doc("b.txt", "Same text.")]);
        let embedder = Arc::new(VocabEmbedder::new(vec!["same"]));
        let index = VectorIndex::build(
            &corpus,
            Some(embedder.clone() as Arc<dyn Embedder>),
            settings(RetrievalMode::Semantic),
        )
        .await
        .unwrap();
        assert_eq!(index.stats().chunks, 2);
        assert_eq!(index.stats().embedded, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keyword_mode_needs_no_embedder() {
        let corpus = Corpus::new(vec![
            doc("a.txt", "Kotlin backend services"),
            doc("b.txt", "Warehouse picking robots"),
        ]);
        let index = VectorIndex::build(&corpus, None, settings(RetrievalMode::Keyword))
            .await
            .unwrap();
        let result = index.query("warehouse robots").await.unwrap();
        assert_eq!(result.passages.len(), 1);
        assert_eq!(result.passages[0].document_id, "b.txt");
    }

    #[tokio::test]
    async fn hybrid_mode_combines_scores() {
        let corpus = Corpus::new(vec![
            doc("a.txt", "automated picking"),
            doc("b.txt", "automation roadmap automation"),
        ]);
        let embedder = Arc::new(VocabEmbedder::new(vec!["automat", "picking"]));
        let index = VectorIndex::build(&corpus, Some(embedder), settings(RetrievalMode::Hybrid))
            .await
            .unwrap();
        let result = index.query("automation roadmap").await.unwrap();
        assert_eq!(result.passages[0].document_id, "b.txt");
        assert!(result.passages[0].score <= 1.0 + 1e-9);
    }

    #[tokio::test]
    async fn semantic_mode_without_embedder_is_config_error() {
        let corpus = Corpus::new(vec![doc("a.txt", "text")]);
        let err = VectorIndex::build(&corpus, None, settings(RetrievalMode::Semantic))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn empty_corpus_is_retrieval_error() {
        let err = VectorIndex::build(&Corpus::default(), None, settings(RetrievalMode::Keyword))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_as_retrieval_error() {
        let corpus = Corpus::new(vec![doc("a.txt", "text")]);
        let mut embedder = VocabEmbedder::new(vec!["text"]);
        embedder.fail = true;
        let err = VectorIndex::build(&corpus, Some(Arc::new(embedder)), settings(RetrievalMode::Semantic))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn handle_builds_lazily_and_caches() {
        let corpus = Corpus::new(vec![doc("a.txt", "warehouse")]);
        let handle = IndexHandle::new(Box::new(corpus), None, settings(RetrievalMode::Keyword));
        assert!(!handle.is_built().await);

        let first = handle.get().await.unwrap();
        let second = handle.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let rebuilt = handle.rebuild().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\nb", 10), "a b");
        assert_eq!(excerpt("žluťoučký", 3), "žlu...");
    }

    #[test]
    fn normalize_equal_scores_to_one() {
        let scores: HashMap<usize, f64> = [(0, 3.0), (1, 3.0)].into_iter().collect();
        let norm = normalize_scores(&scores);
        assert_eq!(norm[&0], 1.0);
        assert_eq!(norm[&1], 1.0);
    }
}
