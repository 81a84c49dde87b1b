use crate::error::SearchError;
use crate::fingerprint::content_fingerprint;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Text to fixed-dimension, L2-normalised vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    /// Embeds in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Offline embedder hashing character trigrams into buckets. Deterministic,
/// which also makes it the fake used by tests.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("char-trigram-{}", dimensions.max(1)),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        // Text shorter than a trigram is hashed whole so it never embeds to zero.
        for window in chars.windows(chars.len().min(3)) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embeddings served by an Ollama instance (`/api/embeddings`).
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(base_url)?.join("api/embeddings")?,
            model: model.into(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let mut embedding = response.json::<OllamaEmbeddingResponse>().await?.embedding;
        if embedding.is_empty() {
            return Err(SearchError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("empty embedding from model {}", self.model),
            });
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Memoises another embedder's vectors on disk, one JSON file per distinct
/// text under `<cache_dir>/<model>/`.
pub struct CachedEmbedder<E> {
    inner: E,
    dir: PathBuf,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, cache_dir: impl Into<PathBuf>) -> Self {
        let model_dir = sanitize_model_id(inner.model_id());
        Self {
            dir: cache_dir.into().join(model_dir),
            inner,
        }
    }

    fn entry_path(&self, text: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", content_fingerprint(text.as_bytes())))
    }
}

fn sanitize_model_id(model_id: &str) -> String {
    model_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let path = self.entry_path(text);
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if let Ok(vector) = serde_json::from_slice::<Vec<f32>>(&bytes) {
                return Ok(vector);
            }
            debug!(path = %path.display(), "ignoring unreadable embedding cache entry");
        }

        let vector = self.inner.embed(text).await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&vector)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_sync("Login timeout is 500ms");
        let second = embedder.embed_sync("Login timeout is 500ms");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_unit_vectors_of_expected_length() {
        let embedder = CharacterNgramEmbedder::new(32);
        let vector = embedder.embed_sync("password reset flow");
        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn text_shorter_than_a_trigram_still_gets_a_unit_vector() {
        let embedder = CharacterNgramEmbedder::default();
        for text in ["qa", "Q"] {
            let vector = embedder.embed_sync(text);
            let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "{text} embedded with norm {norm}");
        }
        assert_eq!(embedder.embed_sync("qa"), embedder.embed_sync("QA"));
        assert!(embedder.embed_sync("").iter().all(|value| *value == 0.0));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            "sentence-transformers/all-mpnet-base-v2"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn cache_serves_repeated_texts_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let cached = CachedEmbedder::new(
            CountingEmbedder {
                calls: AtomicUsize::new(0),
            },
            dir.path(),
        );

        let first = cached.embed("checkout flow").await?;
        let second = cached.embed("checkout flow").await?;
        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert!(dir
            .path()
            .join("sentence-transformers_all-mpnet-base-v2")
            .is_dir());
        Ok(())
    }
}
