use crate::fingerprint::content_fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Raw text produced by a loader, tagged with the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub source: String,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub source: String,
    /// SHA-256 hex digest of `content`.
    pub content_hash: String,
    /// Position of the chunk inside its parent document.
    pub chunk_index: usize,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>, chunk_index: usize) -> Self {
        let content = content.into();
        Self {
            content_hash: content_fingerprint(content.as_bytes()),
            content,
            source: source.into(),
            chunk_index,
        }
    }
}

/// One stored row of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    pub distance: f32,
}

/// A chunk returned by hybrid retrieval with its fused rank score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub status: String,
    pub files_processed: usize,
    pub new_chunks_added: usize,
    pub files_unchanged: usize,
    pub chunks_rejected: usize,
    pub failed_files: Vec<FailedFile>,
}

impl IngestionReport {
    pub fn success() -> Self {
        Self {
            status: "Success".to_string(),
            files_processed: 0,
            new_chunks_added: 0,
            files_unchanged: 0,
            chunks_rejected: 0,
            failed_files: Vec::new(),
        }
    }
}

/// A soft refusal: the query was handled, but produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Rejection {
    pub fn access_denied() -> Self {
        Self {
            error: "Access Denied".to_string(),
            reason: Some("Restricted to QA tasks.".to_string()),
        }
    }

    pub fn insufficient_context() -> Self {
        Self {
            error: "Insufficient Context".to_string(),
            reason: Some("No high-confidence evidence found.".to_string()),
        }
    }

    pub fn parsing_failed() -> Self {
        Self {
            error: "Parsing failed".to_string(),
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Artifact(Value),
    Rejected(Rejection),
}

impl GenerationOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, GenerationOutcome::Rejected(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            GenerationOutcome::Artifact(value) => value.clone(),
            GenerationOutcome::Rejected(rejection) => match &rejection.reason {
                Some(reason) => json!({ "error": rejection.error, "reason": reason }),
                None => json!({ "error": rejection.error }),
            },
        }
    }

    /// Typed view of a successful result. `None` when rejected or when the
    /// model's JSON does not follow the artifact schema.
    pub fn artifact(&self) -> Option<TestArtifact> {
        match self {
            GenerationOutcome::Artifact(value) => serde_json::from_value(value.clone()).ok(),
            GenerationOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    #[serde(rename = "Test Case")]
    TestCase,
    #[serde(rename = "Use Case")]
    UseCase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseExpectation {
    pub scenario: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub ingested_files: Vec<String>,
    pub chunks_retrieved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArtifact {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub feature: String,
    pub objective: String,
    pub preconditions: String,
    pub steps: Vec<String>,
    pub expected_result: String,
    #[serde(default)]
    pub negative_cases: Vec<CaseExpectation>,
    #[serde(default)]
    pub boundary_cases: Vec<CaseExpectation>,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub source_metadata: SourceMetadata,
}
