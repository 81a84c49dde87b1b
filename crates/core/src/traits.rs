use crate::{IndexEntry, SearchError, SearchHit};
use async_trait::async_trait;

/// Persistent embedding storage. Entries are append-only; `reset` is the only
/// way to remove them.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError>;

    /// Nearest `k` entries by squared euclidean distance, closest first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError>;

    /// Every stored entry, in insertion order where the backend keeps one.
    async fn entries(&self) -> Result<Vec<IndexEntry>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;

    async fn reset(&self) -> Result<(), SearchError>;
}
