use async_trait::async_trait;
use qa_rag_core::{
    CharacterNgramEmbedder, DocumentLoader, GenerateError, GenerationOutcome, Generator,
    IndexManager, IngestionEngine, LanguageModel, LocalVectorStore, PipelineConfig, Rejection,
    RetrievalOptions,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const LOCKOUT: &str = "Accounts are locked for fifteen minutes after five consecutive \
                       failed login attempts from the same device.";
const LATENCY: &str = "The login API responds within 500ms under normal load and returns \
                       a session token on success.";

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: root.join("data"),
        index_dir: root.join("db"),
        model_cache_dir: root.join("models"),
        ..PipelineConfig::default()
    }
}

fn index(config: &PipelineConfig) -> Result<IndexManager, Box<dyn std::error::Error>> {
    Ok(IndexManager::new(
        Arc::new(CharacterNgramEmbedder::default()),
        Arc::new(LocalVectorStore::open(&config.index_dir, &config.collection)?),
        RetrievalOptions::from(config),
    ))
}

fn engine(config: &PipelineConfig) -> Result<IngestionEngine, Box<dyn std::error::Error>> {
    Ok(IngestionEngine::new(
        config,
        DocumentLoader::local(config.scanned_pdf_min_chars),
        index(config)?,
    )?)
}

fn write_docs(root: &Path, docs: &[(&str, &str)]) -> std::io::Result<()> {
    fs::create_dir_all(root.join("data"))?;
    for (name, content) in docs {
        fs::write(root.join("data").join(name), content)?;
    }
    Ok(())
}

struct RecordingModel {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(&self, prompt: &str) -> Result<String, GenerateError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.reply.clone())
    }
}

#[tokio::test]
async fn second_ingest_of_unchanged_folder_adds_nothing() -> TestResult {
    let dir = tempdir()?;
    write_docs(dir.path(), &[("auth.md", LOCKOUT), ("api.md", LATENCY)])?;
    let config = config(dir.path());

    let first = engine(&config)?.ingest().await?;
    assert_eq!(first.files_processed, 2);
    assert_eq!(first.new_chunks_added, 2);

    // A fresh engine reads the persisted state, as a new process would.
    let mut again = engine(&config)?;
    let second = again.ingest().await?;
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.new_chunks_added, 0);
    assert_eq!(again.index().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn identical_content_in_two_files_is_indexed_once() -> TestResult {
    let dir = tempdir()?;
    write_docs(dir.path(), &[("a.txt", LOCKOUT), ("copy-of-a.txt", LOCKOUT)])?;
    let config = config(dir.path());

    let mut engine = engine(&config)?;
    let report = engine.ingest().await?;

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.new_chunks_added, 1);
    assert_eq!(engine.index().count().await?, 1);

    let state = engine.tracked_state()?;
    assert_eq!(state.files.len(), 2);
    assert_eq!(state.chunks.len(), 1);
    Ok(())
}

#[tokio::test]
async fn reset_then_ingest_matches_a_first_run() -> TestResult {
    let dir = tempdir()?;
    write_docs(dir.path(), &[("auth.md", LOCKOUT), ("api.md", LATENCY)])?;
    let config = config(dir.path());

    let mut engine = engine(&config)?;
    let first = engine.ingest().await?;
    engine.reset().await?;

    assert_eq!(engine.index().count().await?, 0);
    assert!(engine.tracked_state()?.files.is_empty());

    let rerun = engine.ingest().await?;
    assert_eq!(rerun.files_processed, first.files_processed);
    assert_eq!(rerun.new_chunks_added, first.new_chunks_added);
    assert_eq!(engine.index().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn query_is_answered_from_ingested_context() -> TestResult {
    let dir = tempdir()?;
    write_docs(dir.path(), &[("auth.md", LOCKOUT), ("api.md", LATENCY)])?;
    let config = config(dir.path());
    engine(&config)?.ingest().await?;

    let model = Arc::new(RecordingModel {
        reply: r#"{"type": "Test Case", "feature": "Login latency", "expected_result": "Response within 500ms [api.md]"}"#
            .to_string(),
        prompts: Mutex::new(Vec::new()),
    });
    let generator = Generator::new(&config, index(&config)?, model.clone());

    let outcome = generator
        .generate("Write a test case: the login API responds within 5 seconds under normal load")
        .await?;

    assert_eq!(
        outcome,
        GenerationOutcome::Artifact(json!({
            "type": "Test Case",
            "feature": "Login latency",
            "expected_result": "Response within 500ms [api.md]"
        }))
    );

    let prompts = model.prompts.lock().map(|p| p.clone()).unwrap_or_default();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("500ms"));
    assert!(prompts[0].contains("within 5 seconds"));
    Ok(())
}

#[tokio::test]
async fn off_topic_query_is_denied_even_with_an_index() -> TestResult {
    let dir = tempdir()?;
    write_docs(dir.path(), &[("auth.md", LOCKOUT)])?;
    let config = config(dir.path());
    engine(&config)?.ingest().await?;

    let model = Arc::new(RecordingModel {
        reply: "{}".to_string(),
        prompts: Mutex::new(Vec::new()),
    });
    let generator = Generator::new(&config, index(&config)?, model.clone());

    let outcome = generator.generate("What is the weather today?").await?;
    assert_eq!(outcome, GenerationOutcome::Rejected(Rejection::access_denied()));
    assert_eq!(
        outcome.to_json(),
        json!({"error": "Access Denied", "reason": "Restricted to QA tasks."})
    );
    Ok(())
}
