//! File-backed vector index. The whole collection lives in memory and is
//! rewritten atomically to `<dir>/<collection>.vectors.json` after each add.

use crate::traits::VectorIndex;
use crate::{IndexEntry, SearchError, SearchHit};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct LocalVectorStore {
    path: PathBuf,
    entries: RwLock<Vec<IndexEntry>>,
}

impl LocalVectorStore {
    pub fn open(dir: &Path, collection: &str) -> Result<Self, SearchError> {
        let path = dir.join(format!("{collection}.vectors.json"));
        let entries = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexEntry>>, SearchError> {
        self.entries
            .read()
            .map_err(|_| SearchError::Request("vector store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexEntry>>, SearchError> {
        self.entries
            .write()
            .map_err(|_| SearchError::Request("vector store lock poisoned".to_string()))
    }

    fn persist(&self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

pub fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn add(&self, new_entries: &[IndexEntry]) -> Result<(), SearchError> {
        if new_entries.is_empty() {
            return Ok(());
        }

        let mut entries = self.write()?;
        let expected = entries
            .first()
            .or_else(|| new_entries.first())
            .map(|entry| entry.embedding.len())
            .unwrap_or_default();
        if let Some(bad) = new_entries
            .iter()
            .find(|entry| entry.embedding.len() != expected)
        {
            return Err(SearchError::DimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }

        let mut updated = entries.clone();
        updated.extend_from_slice(new_entries);
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let entries = self.read()?;
        if let Some(first) = entries.first() {
            if first.embedding.len() != vector.len() {
                return Err(SearchError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: vector.len(),
                });
            }
        }

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|entry| SearchHit {
                content: entry.content.clone(),
                source: entry.source.clone(),
                distance: squared_l2(&entry.embedding, vector),
            })
            .collect();
        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>, SearchError> {
        Ok(self.read()?.clone())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.read()?.len())
    }

    async fn reset(&self) -> Result<(), SearchError> {
        let mut entries = self.write()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            embedding,
            content: format!("content {id}"),
            source: format!("/data/{id}.txt"),
        }
    }

    #[tokio::test]
    async fn nearest_entries_come_first() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), "qa")?;
        store
            .add(&[
                entry("far", vec![0.0, 1.0]),
                entry("near", vec![1.0, 0.0]),
            ])
            .await?;

        let hits = store.query(&[1.0, 0.0], 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "content near");
        assert_eq!(hits[0].distance, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn entries_survive_reopen_and_reset_clears_disk() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        {
            let store = LocalVectorStore::open(dir.path(), "qa")?;
            store.add(&[entry("a", vec![0.6, 0.8])]).await?;
        }

        let reopened = LocalVectorStore::open(dir.path(), "qa")?;
        assert_eq!(reopened.count().await?, 1);

        reopened.reset().await?;
        assert_eq!(reopened.count().await?, 0);
        assert!(!reopened.path().exists());
        assert_eq!(LocalVectorStore::open(dir.path(), "qa")?.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), "qa")?;
        store.add(&[entry("a", vec![1.0, 0.0])]).await?;

        let result = store.add(&[entry("b", vec![1.0, 0.0, 0.0])]).await;
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(store.count().await?, 1);
        Ok(())
    }
}
