use crate::RetrievedChunk;

/// Joins retrieved chunk texts into the knowledge block of the prompt.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("Content: {}", chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct chunk sources in first-seen order.
pub fn distinct_sources(chunks: &[RetrievedChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.contains(&chunk.source) {
            sources.push(chunk.source.clone());
        }
    }
    sources
}

pub fn build_generation_prompt(
    context: &str,
    query: &str,
    sources: &[String],
    chunks_retrieved: usize,
) -> String {
    let sources_json = serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"
[LAYER 1: IDENTITY & FORMAT]
You are a Senior QA Engineer. Return ONLY valid JSON.
No prose, no markdown code blocks (```json).

[LAYER 2: ABSOLUTE CONSTRAINTS]
1. CONTEXTUAL SUPREMACY: Use ONLY the provided [LAYER 4] knowledge.
2. NO HALLUCINATION: If a requirement is not in the context, list it in 'missing_info'. NEVER guess.
3. CONTRADICTION RULE: If the user request states a value that differs from a value in the context, the context value wins. Example: the request says "5 seconds" but the context says "500ms", so you MUST use "500ms".
4. SCOPE GUARDRAIL: If the user asks for a feature listed in an 'Out of Scope' section, create a Negative Case only.
5. CITATION MANDATE: Every field (steps, expected_result, etc.) MUST end with its source file name in brackets, e.g. [requirements.pdf].

[LAYER 3: TASK CLASSIFICATION]
- Use 'Test Case' for technical verification/steps.
- Use 'Use Case' for high-level user goals/flows.

[LAYER 4: RETRIEVED KNOWLEDGE (The Ground Truth)]
{context}

[LAYER 5: USER REQUEST]
{query}

[LAYER 6: DYNAMIC OUTPUT TEMPLATE]
{{
  "type": "Test Case OR Use Case",
  "feature": "Name",
  "objective": "Grounded goal",
  "preconditions": "System state",
  "steps": ["Step 1: Action", "Step 2: Action"],
  "expected_result": "Detailed response citing specific metrics from text",
  "negative_cases": [{{"scenario": "Invalid action", "expected": "Error behavior"}}],
  "boundary_cases": [{{"scenario": "Limit test", "expected": "Threshold behavior"}}],
  "missing_info": [],
  "assumptions": [],
  "source_metadata": {{ "ingested_files": {sources_json}, "chunks_retrieved": {chunks_retrieved} }}
}}
"#
    )
}
