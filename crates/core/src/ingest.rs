use crate::chunking::{split_documents, ChunkingConfig};
use crate::fingerprint::{digest_file, should_skip_chunk, should_skip_file, ChunkRegistry};
use crate::index::IndexManager;
use crate::loader::DocumentLoader;
use crate::quality::{QualityFilter, Verdict};
use crate::state::{IngestState, StateStore};
use crate::{Chunk, FailedFile, IngestError, IngestionReport, LoadError, PipelineConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Every regular file under `folder`, recursively, in sorted order. Hidden
/// entries are left out.
pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

/// Loader, dedup, chunker, quality filter and index in one idempotent run.
/// Exclusive borrows on `ingest` and `reset` keep one writer per engine; the
/// caller serializes engines across processes.
pub struct IngestionEngine {
    data_dir: PathBuf,
    loader: DocumentLoader,
    index: IndexManager,
    state: StateStore,
    quality: QualityFilter,
    chunking: ChunkingConfig,
}

impl IngestionEngine {
    pub fn new(
        config: &PipelineConfig,
        loader: DocumentLoader,
        index: IndexManager,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            data_dir: config.data_dir.clone(),
            loader,
            index,
            state: StateStore::new(config.index_dir.clone()),
            quality: QualityFilter::from_config(config)?,
            chunking: ChunkingConfig::try_from(config)?,
        })
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    pub fn tracked_state(&self) -> Result<IngestState, IngestError> {
        self.state.load()
    }

    pub async fn ingest(&mut self) -> Result<IngestionReport, IngestError> {
        if !self.data_dir.is_dir() {
            return Err(IngestError::MissingSourceDir(
                self.data_dir.display().to_string(),
            ));
        }

        let mut state = self.state.load()?;
        let mut report = IngestionReport::success();
        let mut documents = Vec::new();
        let mut loaded_files = BTreeMap::new();

        for path in discover_files(&self.data_dir) {
            let key = std::fs::canonicalize(&path)
                .unwrap_or_else(|_| path.clone())
                .to_string_lossy()
                .to_string();

            let outcome = digest_file(&path).map_err(LoadError::from).and_then(|fingerprint| {
                if should_skip_file(&key, &fingerprint, &state.files) {
                    return Ok(None);
                }
                self.loader
                    .load(&path)
                    .map(|loaded| Some((fingerprint, loaded)))
            });

            match outcome {
                Ok(None) => {
                    debug!(path = %key, "unchanged since last run");
                    report.files_unchanged += 1;
                }
                Ok(Some((fingerprint, loaded))) => {
                    debug!(path = %key, documents = loaded.len(), "loaded");
                    documents.extend(loaded);
                    loaded_files.insert(key, fingerprint);
                }
                Err(error) => {
                    warn!(path = %key, error = %error, "skipping file that failed to load");
                    report.failed_files.push(FailedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }
        report.files_processed = loaded_files.len();

        let (accepted, rejected) = self.select_chunks(
            split_documents(&documents, self.chunking),
            &state.chunks,
        );
        report.chunks_rejected = rejected;

        report.new_chunks_added = self.index.add(&accepted).await?;

        if !loaded_files.is_empty() {
            state.files.extend(loaded_files);
            state
                .chunks
                .extend(accepted.into_iter().map(|chunk| chunk.content_hash));
            self.state.save(&state)?;
        }

        info!(
            files_processed = report.files_processed,
            files_unchanged = report.files_unchanged,
            files_failed = report.failed_files.len(),
            new_chunks_added = report.new_chunks_added,
            chunks_rejected = report.chunks_rejected,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Drops chunks already indexed (by this run or an earlier one) and chunks
    /// the quality filter rejects. Returns the survivors and the rejection count.
    fn select_chunks(&self, candidates: Vec<Chunk>, registry: &ChunkRegistry) -> (Vec<Chunk>, usize) {
        let mut seen = ChunkRegistry::new();
        let mut accepted = Vec::new();
        let mut rejected = 0usize;

        for chunk in candidates {
            if should_skip_chunk(&chunk.content_hash, registry)
                || should_skip_chunk(&chunk.content_hash, &seen)
            {
                continue;
            }

            match self.quality.assess(&chunk.content) {
                Verdict::Accepted => {
                    seen.insert(chunk.content_hash.clone());
                    accepted.push(chunk);
                }
                verdict => {
                    debug!(source = %chunk.source, index = chunk.chunk_index, ?verdict, "chunk rejected");
                    rejected += 1;
                }
            }
        }

        (accepted, rejected)
    }

    /// Clears the manifest and registry, then the vector index. Stopping
    /// between the two leaves files to be re-ingested, never an empty index
    /// behind a manifest that claims they are indexed.
    pub async fn reset(&mut self) -> Result<(), IngestError> {
        self.state.clear()?;
        self.index.reset().await?;
        info!("index, manifest and chunk registry cleared");
        Ok(())
    }
}
