use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use qa_rag_core::{
    CachedEmbedder, CharacterNgramEmbedder, DocumentLoader, Embedder, Generator, HttpOcrEngine,
    IndexManager, IngestionEngine, LocalVectorStore, OllamaClient, OllamaEmbedder, PipelineConfig,
    QdrantStore, RetrievalOptions, StateStore, TesseractOcr, VectorIndex,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "qa-rag", version, about = "Grounded QA test case generation over a document folder")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with pipeline settings. Flags below override it.
    #[arg(long, env = "QA_RAG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Folder scanned for source documents.
    #[arg(long, env = "QA_RAG_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Folder holding the vector index and ingestion state.
    #[arg(long, env = "QA_RAG_INDEX_DIR", global = true)]
    index_dir: Option<PathBuf>,

    /// Folder for cached embeddings.
    #[arg(long, env = "QA_RAG_MODEL_CACHE_DIR", global = true)]
    model_cache_dir: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_HOST", global = true)]
    ollama_url: Option<String>,

    /// Model used to write test artifacts.
    #[arg(long, env = "QA_RAG_LLM_MODEL", global = true)]
    llm_model: Option<String>,

    /// Model used by the ollama embedder.
    #[arg(long, env = "QA_RAG_EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    #[arg(long, value_enum, env = "QA_RAG_EMBEDDER", default_value = "hashing", global = true)]
    embedder: EmbedderKind,

    #[arg(long, value_enum, env = "QA_RAG_STORE", default_value = "local", global = true)]
    store: StoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    #[arg(long, value_enum, env = "QA_RAG_OCR", default_value = "tesseract", global = true)]
    ocr: OcrKind,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline character-trigram hashing.
    Hashing,
    /// Ollama `/api/embeddings`, cached on disk.
    Ollama,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OcrKind {
    /// tesseract and pdftoppm binaries on PATH.
    Tesseract,
    /// Remote OCR service from LLM_OCR_ENDPOINT and LLM_OCR_API_KEY.
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Index new or changed documents from the data folder.
    Ingest,
    /// Generate a test artifact for a QA request.
    Query {
        #[arg(long)]
        text: String,
    },
    /// Drop the index and the ingestion state.
    Reset,
    /// Show index and state sizes.
    Inspect,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.index_dir {
            config.index_dir = dir.clone();
        }
        if let Some(dir) = &self.model_cache_dir {
            config.model_cache_dir = dir.clone();
        }
        if let Some(url) = &self.ollama_url {
            // OLLAMA_HOST is often a bare host:port.
            config.ollama_url = if url.contains("://") {
                url.clone()
            } else {
                format!("http://{url}")
            };
        }
        if let Some(model) = &self.llm_model {
            config.llm_model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn embedder(&self, config: &PipelineConfig) -> anyhow::Result<Arc<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Hashing => Arc::new(CharacterNgramEmbedder::default()),
            EmbedderKind::Ollama => Arc::new(CachedEmbedder::new(
                OllamaEmbedder::new(&config.ollama_url, config.embedding_model.clone())?,
                config.model_cache_dir.clone(),
            )),
        })
    }

    /// No network traffic here; Qdrant creates its collection on first add.
    fn vector_index(&self, config: &PipelineConfig) -> anyhow::Result<Arc<dyn VectorIndex>> {
        Ok(match self.store {
            StoreKind::Local => Arc::new(LocalVectorStore::open(&config.index_dir, &config.collection)?),
            StoreKind::Qdrant => Arc::new(QdrantStore::new(&self.qdrant_url, &config.collection)),
        })
    }

    fn loader(&self, config: &PipelineConfig) -> anyhow::Result<DocumentLoader> {
        let loader = DocumentLoader::local(config.scanned_pdf_min_chars);
        Ok(match self.ocr {
            OcrKind::Tesseract => loader.with_ocr(Box::new(TesseractOcr::default())),
            OcrKind::Http => {
                let engine = HttpOcrEngine::from_env()
                    .ok_or_else(|| anyhow!("--ocr http needs LLM_OCR_ENDPOINT to be set"))?;
                loader.with_ocr(Box::new(engine))
            }
        })
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %config.data_dir.display(),
        index_dir = %config.index_dir.display(),
        embedder = ?cli.embedder,
        store = ?cli.store,
        "qa-rag boot"
    );

    let embedder = cli.embedder(&config)?;
    let store = cli.vector_index(&config)?;
    let index = IndexManager::new(embedder, store, RetrievalOptions::from(&config));

    match &cli.command {
        Command::Ingest => {
            let mut engine = IngestionEngine::new(&config, cli.loader(&config)?, index)?;
            let report = engine.ingest().await?;
            for failed in &report.failed_files {
                warn!(path = %failed.path.display(), reason = %failed.reason, "file skipped");
            }
            print_json(&serde_json::to_value(&report)?)?;
        }
        Command::Query { text } => {
            let model = OllamaClient::new(&config.ollama_url, config.llm_model.clone())?;
            let generator = Generator::new(&config, index, Arc::new(model));
            let outcome = generator.generate(text).await?;
            let rendered = outcome.to_json();
            if outcome.is_rejected() {
                warn!(response = %rendered, "query produced no artifact");
            }
            print_json(&rendered)?;
        }
        Command::Reset => {
            // Reset never loads files, so the configured OCR backend is not needed.
            let loader = DocumentLoader::local(config.scanned_pdf_min_chars);
            let mut engine = IngestionEngine::new(&config, loader, index)?;
            engine.reset().await?;
            println!("index and ingestion state cleared at {}", Utc::now().to_rfc3339());
        }
        Command::Inspect => {
            let state_store = StateStore::new(config.index_dir.clone());
            let state = state_store.load()?;
            print_json(&json!({
                "collection": config.collection,
                "indexed_chunks": index.count().await?,
                "tracked_files": state.files.len(),
                "tracked_chunks": state.chunks.len(),
                "updated_at": state.updated_at.map(|at| at.to_rfc3339()),
                "state_path": config.state_path().display().to_string(),
            }))?;
        }
    }

    Ok(())
}
