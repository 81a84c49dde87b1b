use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every tunable of the pipeline. Built once, validated, then shared read-only
/// with each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    pub model_cache_dir: PathBuf,
    pub collection: String,

    pub llm_model: String,
    pub embedding_model: String,
    pub ollama_url: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub top_k: usize,
    /// Maximum acceptable squared-L2 distance of the best match. Lower is closer.
    pub confidence_threshold: f32,
    pub semantic_weight: f64,
    pub keyword_weight: f64,

    pub min_chunk_length: usize,
    pub min_alphanumeric_ratio: f64,
    pub max_repetition_ratio: f64,
    pub boilerplate_patterns: Vec<String>,

    /// Heuristic only: a PDF whose text layer is shorter than this is treated
    /// as a scan and sent through OCR.
    pub scanned_pdf_min_chars: usize,

    pub qa_keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            index_dir: PathBuf::from("db"),
            model_cache_dir: PathBuf::from("models"),
            collection: "qa_chunks".to_string(),
            llm_model: "llama3.2".to_string(),
            embedding_model: "sentence-transformers/all-mpnet-base-v2".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 4,
            confidence_threshold: 1.25,
            semantic_weight: 0.6,
            keyword_weight: 0.4,
            min_chunk_length: 50,
            min_alphanumeric_ratio: 0.4,
            max_repetition_ratio: 0.3,
            boilerplate_patterns: vec![
                r"Page \d+ of \d+".to_string(),
                r"All rights reserved".to_string(),
                r"Confidential".to_string(),
            ],
            scanned_pdf_min_chars: 150,
            qa_keywords: [
                "test",
                "case",
                "scenario",
                "verify",
                "check",
                "qa",
                "use case",
                "requirement",
            ]
            .iter()
            .map(|keyword| keyword.to_string())
            .collect(),
        }
    }
}

impl PipelineConfig {
    /// Reads a TOML file; keys that are absent keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig("top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_alphanumeric_ratio) {
            return Err(IngestError::InvalidConfig(format!(
                "min_alphanumeric_ratio {} is outside [0, 1]",
                self.min_alphanumeric_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.max_repetition_ratio) {
            return Err(IngestError::InvalidConfig(format!(
                "max_repetition_ratio {} is outside [0, 1]",
                self.max_repetition_ratio
            )));
        }
        if self.semantic_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(IngestError::InvalidConfig(
                "retriever weights must not be negative".to_string(),
            ));
        }
        if !self.confidence_threshold.is_finite() || self.confidence_threshold < 0.0 {
            return Err(IngestError::InvalidConfig(format!(
                "confidence_threshold {} must be a finite, non-negative distance",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.index_dir.join(crate::state::STATE_FILE_NAME)
    }
}
