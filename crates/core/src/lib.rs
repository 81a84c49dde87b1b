pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod keyword;
pub mod llm;
pub mod loader;
pub mod models;
pub mod office;
pub mod prompt;
pub mod quality;
pub mod state;
pub mod stores;
pub mod traits;

pub use chunking::{split_documents, split_text, ChunkingConfig, DEFAULT_SEPARATORS};
pub use config::PipelineConfig;
pub use embeddings::{
    CachedEmbedder, CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{GenerateError, IngestError, LoadError, SearchError};
pub use extractor::{HttpOcrEngine, LopdfExtractor, OcrEngine, PageText, PdfTextExtractor, TesseractOcr};
pub use fingerprint::{content_fingerprint, ChunkRegistry, FileManifest};
pub use generator::{parse_model_output, Generator, QueryGuard};
pub use index::{IndexManager, RetrievalOptions};
pub use ingest::{discover_files, IngestionEngine};
pub use keyword::Bm25Index;
pub use llm::{LanguageModel, OllamaClient};
pub use loader::DocumentLoader;
pub use models::{
    ArtifactKind, CaseExpectation, Chunk, Document, FailedFile, GenerationOutcome, IndexEntry,
    IngestionReport, Rejection, RetrievedChunk, SearchHit, SourceMetadata, TestArtifact,
};
pub use office::{FileExtractor, StructuredFileLoader};
pub use quality::{QualityFilter, Verdict};
pub use state::{IngestState, StateStore};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorIndex;
