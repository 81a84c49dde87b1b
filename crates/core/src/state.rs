//! Durable side-channel state of the ingestion run: the file manifest and the
//! chunk registry, kept together in one JSON document so that they are always
//! replaced together.

use crate::error::IngestError;
use crate::fingerprint::{ChunkRegistry, FileManifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const STATE_FILE_NAME: &str = "ingest_state.json";
pub const LEGACY_MANIFEST_FILE_NAME: &str = "ingested_files.json";
pub const LEGACY_REGISTRY_FILE_NAME: &str = "chunk_registry.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestState {
    #[serde(default)]
    pub files: FileManifest,
    #[serde(default)]
    pub chunks: ChunkRegistry,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    /// Missing files yield an empty state. A directory that only holds the two
    /// older standalone files is imported from them.
    pub fn load(&self) -> Result<IngestState, IngestError> {
        let path = self.path();
        if path.exists() {
            let bytes = fs::read(&path)?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let mut state = IngestState::default();
        let manifest_path = self.dir.join(LEGACY_MANIFEST_FILE_NAME);
        if manifest_path.exists() {
            state.files = serde_json::from_slice(&fs::read(&manifest_path)?)?;
        }
        let registry_path = self.dir.join(LEGACY_REGISTRY_FILE_NAME);
        if registry_path.exists() {
            let hashes: Vec<String> = serde_json::from_slice(&fs::read(&registry_path)?)?;
            state.chunks = hashes.into_iter().collect();
        }
        if !state.files.is_empty() || !state.chunks.is_empty() {
            info!(
                files = state.files.len(),
                chunks = state.chunks.len(),
                "imported legacy manifest and chunk registry"
            );
        }
        Ok(state)
    }

    /// Writes to a sibling temp file and renames it over the target, so readers
    /// see either the previous state or the new one.
    pub fn save(&self, state: &IngestState) -> Result<(), IngestError> {
        fs::create_dir_all(&self.dir)?;
        let mut stamped = state.clone();
        stamped.updated_at = Some(Utc::now());

        let bytes = serde_json::to_vec_pretty(&stamped)?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IngestError> {
        for name in [
            STATE_FILE_NAME,
            LEGACY_MANIFEST_FILE_NAME,
            LEGACY_REGISTRY_FILE_NAME,
        ] {
            remove_if_present(&self.dir.join(name))?;
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
