use crate::traits::VectorIndex;
use crate::{IndexEntry, SearchError, SearchHit};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

/// Qdrant collection with euclidean distance. Qdrant reports plain L2, which
/// is squared here to line up with [`crate::stores::LocalVectorStore`].
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn backend_error(status: StatusCode) -> SearchError {
        SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }

    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let existing = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != vector_size => Err(SearchError::DimensionMismatch {
                    expected: size as usize,
                    actual: vector_size,
                }),
                _ => Ok(()),
            };
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Euclid" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }
        Ok(())
    }
}

fn entry_from_point(point: &Value) -> IndexEntry {
    let text = |pointer: &str| {
        point
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let embedding = point
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();
    let id = point
        .pointer("/id")
        .map(|id| match id {
            Value::String(value) => value.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    IndexEntry {
        id,
        embedding,
        content: text("/payload/content"),
        source: text("/payload/source"),
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add(&self, entries: &[IndexEntry]) -> Result<(), SearchError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let vector_size = first.embedding.len();
        if let Some(bad) = entries
            .iter()
            .find(|entry| entry.embedding.len() != vector_size)
        {
            return Err(SearchError::DimensionMismatch {
                expected: vector_size,
                actual: bad.embedding.len(),
            });
        }
        self.ensure_collection(vector_size).await?;

        let points: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let id = Uuid::parse_str(&entry.id).unwrap_or_else(|_| Uuid::new_v4());
                json!({
                    "id": id.to_string(),
                    "vector": entry.embedding,
                    "payload": { "content": entry.content, "source": entry.source },
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let entry = entry_from_point(hit);
                let distance = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(f64::MAX);
                SearchHit {
                    content: entry.content,
                    source: entry.source,
                    distance: (distance * distance) as f32,
                }
            })
            .collect())
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>, SearchError> {
        let mut entries = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": true,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(format!("{}/points/scroll", self.collection_url()))
                .json(&body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(Self::backend_error(response.status()));
            }

            let parsed: Value = response.json().await?;
            if let Some(points) = parsed.pointer("/result/points").and_then(Value::as_array) {
                entries.extend(points.iter().map(entry_from_point));
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(entries)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn reset(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::backend_error(response.status()))
    }
}
