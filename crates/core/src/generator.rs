use crate::error::GenerateError;
use crate::index::IndexManager;
use crate::llm::LanguageModel;
use crate::models::{GenerationOutcome, Rejection};
use crate::prompt::{build_context, build_generation_prompt, distinct_sources};
use crate::PipelineConfig;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Keyword allow-list for incoming queries. A substring match, so it admits
/// anything that mentions a keyword; it is a scope hint, not access control.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    keywords: Vec<String>,
}

impl QueryGuard {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|keyword| keyword.to_lowercase()).collect(),
        }
    }

    pub fn is_valid_qa_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.keywords.iter().any(|keyword| query.contains(keyword.as_str()))
    }
}

pub struct Generator {
    index: IndexManager,
    model: Arc<dyn LanguageModel>,
    guard: QueryGuard,
    confidence_threshold: f32,
}

impl Generator {
    pub fn new(config: &PipelineConfig, index: IndexManager, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            index,
            model,
            guard: QueryGuard::new(&config.qa_keywords),
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn guard(&self) -> &QueryGuard {
        &self.guard
    }

    /// Admission, confidence gate, hybrid retrieval, prompt, model call and
    /// parse, stopping at the first stage that refuses.
    pub async fn generate(&self, query: &str) -> Result<GenerationOutcome, GenerateError> {
        if !self.guard.is_valid_qa_query(query) {
            info!("query refused by QA keyword guard");
            return Ok(GenerationOutcome::Rejected(Rejection::access_denied()));
        }

        let nearest = self.index.confidence_search(query, 1).await?;
        match nearest.first() {
            Some(best) if best.distance <= self.confidence_threshold => {
                debug!(distance = best.distance, source = %best.source, "confidence gate passed");
            }
            best => {
                info!(
                    distance = best.map(|hit| hit.distance),
                    threshold = self.confidence_threshold,
                    "no evidence within the confidence threshold"
                );
                return Ok(GenerationOutcome::Rejected(Rejection::insufficient_context()));
            }
        }

        let chunks = self.index.hybrid_retrieve(query).await?;
        let prompt = build_generation_prompt(
            &build_context(&chunks),
            query,
            &distinct_sources(&chunks),
            chunks.len(),
        );
        debug!(chunks = chunks.len(), prompt_chars = prompt.len(), "calling language model");

        let raw = self.model.complete(&prompt).await?;
        let outcome = parse_model_output(&raw);
        if outcome.is_rejected() {
            warn!(response_chars = raw.len(), "model output was not parseable JSON");
        }
        Ok(outcome)
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```json\s*|\s*```").ok())
        .as_ref()
}

/// Recovers a JSON object from model output that may be wrapped in code
/// fences or surrounded by prose. The first `{` that opens a complete JSON
/// value wins and anything after that value is ignored. Failing that, the
/// whole text is parsed.
pub fn parse_model_output(text: &str) -> GenerationOutcome {
    let cleaned = match fence_pattern() {
        Some(fence) => fence.replace_all(text, ""),
        None => Cow::Borrowed(text),
    };
    let cleaned = cleaned.trim();

    let embedded = cleaned
        .match_indices('{')
        .find_map(|(start, _)| first_json_value(&cleaned[start..]));
    let parsed = embedded.or_else(|| serde_json::from_str::<Value>(cleaned).ok());

    match parsed {
        Some(value) => GenerationOutcome::Artifact(value),
        None => GenerationOutcome::Rejected(Rejection::parsing_failed()),
    }
}

fn first_json_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::index::RetrievalOptions;
    use crate::stores::LocalVectorStore;
    use crate::{Chunk, SearchError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, GenerateError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok(self.reply.clone())
        }
    }

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }
    }

    const ARTIFACT: &str = r#"{"type": "Test Case", "feature": "Login"}"#;

    fn config(threshold: f32) -> PipelineConfig {
        PipelineConfig {
            confidence_threshold: threshold,
            ..PipelineConfig::default()
        }
    }

    async fn seeded_index(
        dir: &std::path::Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<IndexManager, Box<dyn std::error::Error>> {
        let config = PipelineConfig::default();
        let index = IndexManager::new(
            embedder,
            Arc::new(LocalVectorStore::open(dir, "qa")?),
            RetrievalOptions::from(&config),
        );
        index
            .add(&[
                Chunk::new("The login API responds within 500ms under normal load.", "/d/api.md", 0),
                Chunk::new("Accounts lock after five failed login attempts.", "/d/auth.md", 0),
            ])
            .await?;
        Ok(index)
    }

    #[test]
    fn guard_matches_keywords_case_insensitively() {
        let guard = QueryGuard::new(&PipelineConfig::default().qa_keywords);
        assert!(guard.is_valid_qa_query("Write a TEST for login"));
        assert!(guard.is_valid_qa_query("Describe the Use Case for checkout"));
        assert!(guard.is_valid_qa_query("what are the requirements?"));
        assert!(!guard.is_valid_qa_query("What is the weather today?"));
        assert!(!guard.is_valid_qa_query(""));
    }

    #[tokio::test]
    async fn off_topic_query_never_touches_the_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = Arc::new(CountingEmbedder::default());
        let index = seeded_index(dir.path(), embedder.clone()).await?;
        let seeded_calls = embedder.calls.load(Ordering::SeqCst);
        let model = ScriptedModel::new(ARTIFACT);
        let generator = Generator::new(&config(1.25), index, model.clone());

        let outcome = generator.generate("What is the weather today?").await?;

        assert_eq!(outcome, GenerationOutcome::Rejected(Rejection::access_denied()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), seeded_calls);
        assert!(model.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_is_insufficient_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = IndexManager::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(LocalVectorStore::open(dir.path(), "qa")?),
            RetrievalOptions::from(&PipelineConfig::default()),
        );
        let model = ScriptedModel::new(ARTIFACT);
        let generator = Generator::new(&config(1.25), index, model.clone());

        let outcome = generator.generate("Write a test case for login").await?;
        assert_eq!(outcome, GenerationOutcome::Rejected(Rejection::insufficient_context()));
        assert!(model.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn distant_evidence_is_insufficient_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = seeded_index(dir.path(), Arc::new(CharacterNgramEmbedder::default())).await?;
        let model = ScriptedModel::new(ARTIFACT);
        // Normalized vectors are never closer than distance zero.
        let generator = Generator::new(&config(-1.0), index, model.clone());

        let outcome = generator.generate("Write a test case for login").await?;
        assert_eq!(outcome, GenerationOutcome::Rejected(Rejection::insufficient_context()));
        assert!(model.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn two_letter_query_does_not_pass_the_gate_on_unrelated_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = IndexManager::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(LocalVectorStore::open(dir.path(), "qa")?),
            RetrievalOptions::from(&PipelineConfig::default()),
        );
        index
            .add(&[Chunk::new("The cart total includes tax and shipping.", "/d/cart.md", 0)])
            .await?;
        let model = ScriptedModel::new(ARTIFACT);
        let generator = Generator::new(&config(1.25), index, model.clone());

        let outcome = generator.generate("qa").await?;
        assert_eq!(outcome, GenerationOutcome::Rejected(Rejection::insufficient_context()));
        assert!(model.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn grounded_query_reaches_the_model() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = seeded_index(dir.path(), Arc::new(CharacterNgramEmbedder::default())).await?;
        let model = ScriptedModel::new(&format!("Here you go:\n```json\n{ARTIFACT}\n```"));
        let generator = Generator::new(&config(4.0), index, model.clone());

        let outcome = generator
            .generate("Write a test case: the login API must respond in 5 seconds")
            .await?;

        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"type": "Test Case", "feature": "Login"})));
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Content: The login API responds within 500ms under normal load."));
        assert!(prompts[0].contains("must respond in 5 seconds"));
        assert!(prompts[0].contains("\"chunks_retrieved\": 2"));
        Ok(())
    }

    #[test]
    fn fenced_output_is_recovered() {
        let outcome = parse_model_output("```json\n{\"feature\": \"Cart\"}\n```");
        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"feature": "Cart"})));
    }

    #[test]
    fn surrounding_prose_is_ignored() {
        let outcome = parse_model_output("Sure! {\"steps\": [\"a\", {\"b\": 1}]} Hope this helps.");
        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"steps": ["a", {"b": 1}]})));
    }

    #[test]
    fn braces_in_trailing_prose_do_not_break_recovery() {
        let outcome = parse_model_output(
            "{\"feature\": \"Login\"}\nNote: replace {username} with a real account.",
        );
        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"feature": "Login"})));
    }

    #[test]
    fn first_of_several_objects_is_kept() {
        let outcome = parse_model_output("{\"feature\": \"Login\"}\n{\"feature\": \"Cart\"}");
        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"feature": "Login"})));
    }

    #[test]
    fn braces_in_leading_prose_are_skipped() {
        let outcome = parse_model_output("For {user}: {\"steps\": []}");
        assert_eq!(outcome, GenerationOutcome::Artifact(json!({"steps": []})));
    }

    #[test]
    fn output_without_json_is_a_parse_failure() {
        assert_eq!(
            parse_model_output("I cannot help with that."),
            GenerationOutcome::Rejected(Rejection::parsing_failed())
        );
        assert_eq!(
            parse_model_output("{ broken"),
            GenerationOutcome::Rejected(Rejection::parsing_failed())
        );
    }
}
