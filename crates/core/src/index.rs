use crate::embeddings::Embedder;
use crate::keyword::Bm25Index;
use crate::traits::VectorIndex;
use crate::{Chunk, IndexEntry, PipelineConfig, RetrievedChunk, SearchError, SearchHit};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const RRF_K: f64 = 60.0;

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
}

impl From<&PipelineConfig> for RetrievalOptions {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            top_k: value.top_k,
            semantic_weight: value.semantic_weight,
            keyword_weight: value.keyword_weight,
        }
    }
}

/// Owns the embedding function and the vector index, and answers both the
/// confidence search and hybrid retrieval. Performs no deduplication.
#[derive(Clone)]
pub struct IndexManager {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorIndex>,
    options: RetrievalOptions,
}

impl IndexManager {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            options,
        }
    }

    pub fn options(&self) -> RetrievalOptions {
        self.options
    }

    pub async fn add(&self, chunks: &[Chunk]) -> Result<usize, SearchError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                id: Uuid::new_v4().to_string(),
                embedding,
                content: chunk.content.clone(),
                source: chunk.source.clone(),
            })
            .collect();

        self.store.add(&entries).await?;
        Ok(entries.len())
    }

    pub async fn reset(&self) -> Result<(), SearchError> {
        self.store.reset().await
    }

    pub async fn count(&self) -> Result<usize, SearchError> {
        self.store.count().await
    }

    /// Nearest `k` chunks with their distances, closest first.
    pub async fn confidence_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vector = self.embedder.embed(query).await?;
        self.store.query(&vector, k).await
    }

    /// Weighted reciprocal-rank fusion of the semantic top-k and the BM25
    /// top-k over every indexed chunk. Semantic only when the index is empty.
    pub async fn hybrid_retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, SearchError> {
        let top_k = self.options.top_k;
        let semantic = self.confidence_search(query, top_k).await?;

        let corpus = self.store.entries().await?;
        if corpus.is_empty() {
            return Ok(semantic
                .into_iter()
                .map(|hit| RetrievedChunk {
                    content: hit.content,
                    source: hit.source,
                    score: 0.0,
                })
                .collect());
        }

        let bm25 = Bm25Index::build(corpus.iter().map(|entry| entry.content.as_str()));
        let keyword: Vec<(&str, &str)> = bm25
            .search(query, top_k)
            .into_iter()
            .filter_map(|(position, _)| corpus.get(position))
            .map(|entry| (entry.content.as_str(), entry.source.as_str()))
            .collect();

        debug!(
            semantic_hits = semantic.len(),
            keyword_hits = keyword.len(),
            corpus = corpus.len(),
            "hybrid retrieval candidates"
        );

        let mut fused = FusedRanking::default();
        fused.apply(
            semantic
                .iter()
                .map(|hit| (hit.content.as_str(), hit.source.as_str())),
            self.options.semantic_weight,
        );
        fused.apply(keyword.into_iter(), self.options.keyword_weight);
        Ok(fused.into_ranked(top_k))
    }
}

/// Accumulates weighted RRF scores keyed by chunk content, remembering first
/// appearance to break ties deterministically.
#[derive(Default)]
struct FusedRanking {
    hits: Vec<RetrievedChunk>,
    positions: HashMap<String, usize>,
}

impl FusedRanking {
    fn apply<'a>(&mut self, ranked: impl Iterator<Item = (&'a str, &'a str)>, weight: f64) {
        for (rank, (content, source)) in ranked.enumerate() {
            let contribution = weight / (RRF_K + rank as f64 + 1.0);
            match self.positions.get(content) {
                Some(&position) => self.hits[position].score += contribution,
                None => {
                    self.positions.insert(content.to_string(), self.hits.len());
                    self.hits.push(RetrievedChunk {
                        content: content.to_string(),
                        source: source.to_string(),
                        score: contribution,
                    });
                }
            }
        }
    }

    fn into_ranked(self, limit: usize) -> Vec<RetrievedChunk> {
        let mut ranked: Vec<(usize, RetrievedChunk)> = self.hits.into_iter().enumerate().collect();
        ranked.sort_by(|left, right| {
            right
                .1
                .score
                .total_cmp(&left.1.score)
                .then(left.0.cmp(&right.0))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|(_, hit)| hit)
            .collect()
    }
}
