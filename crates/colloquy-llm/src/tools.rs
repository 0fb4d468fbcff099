use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::provider::{ContentPart, LanguageModel, ModelMessage, ModelRequest, ToolSpec};

/// A capability the model may call mid-generation.
///
/// `execute` performs exactly one external call and never fails: a collaborator
/// error or a malformed input yields the tool's empty result so the model can
/// carry on without it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn output_schema(&self) -> Value;
    async fn execute(&self, input: Value) -> Value;
}

/// Named set of tools offered to the model for one turn.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    /// Subset restricted to `names`. Unknown names are ignored with a warning.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> ToolSet {
        let mut out = ToolSet::new();
        for name in names {
            match self.tools.get(name.as_ref()) {
                Some(tool) => {
                    out.tools.insert(tool.name(), tool.clone());
                }
                None => warn!(tool = name.as_ref(), "unknown tool requested, skipping"),
            }
        }
        out
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    /// Run a tool by name. A name outside the set yields an empty result.
    pub async fn execute(&self, name: &str, input: Value) -> Value {
        match self.tools.get(name) {
            Some(tool) => tool.execute(input).await,
            None => {
                warn!(tool = name, "model called a tool that is not enabled");
                json!([])
            }
        }
    }
}

// ── Retrieval ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub relevance: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

/// HTTP client for the retrieval backend (`POST {base}/api/query`).
#[derive(Clone)]
pub struct RetrievalClient {
    client: reqwest::Client,
    base_url: String,
}

impl RetrievalClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Documents matching `query`. Any failure yields an empty list.
    pub async fn query(&self, query: &str, domain: Option<&str>) -> Vec<Document> {
        let response = match self
            .client
            .post(format!("{}/api/query", self.base_url))
            .json(&QueryRequest { query, domain })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "retrieval request failed");
                return vec![];
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "retrieval returned non-success");
            return vec![];
        }

        match response.json::<QueryResponse>().await {
            Ok(body) => {
                debug!(count = body.documents.len(), "retrieval documents found");
                body.documents
            }
            Err(e) => {
                warn!(error = %e, "retrieval response was not understood");
                vec![]
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetInformationInput {
    question: String,
    #[serde(default)]
    #[allow(dead_code)]
    similar_questions: Vec<String>,
    #[serde(default)]
    domain: Option<String>,
}

/// Looks the user's question up in the knowledge base.
pub struct GetInformation {
    retrieval: RetrievalClient,
}

impl GetInformation {
    pub const NAME: &'static str = "getInformation";

    pub fn new(retrieval: RetrievalClient) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Tool for GetInformation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "get information from your knowledge base to answer questions."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "the users question" },
                "similarQuestions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "keywords to search"
                },
                "domain": { "type": "string", "description": "optional domain to restrict the search to" }
            },
            "required": ["question", "similarQuestions"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "metadata": { "type": "object" }
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let input: GetInformationInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, "getInformation called with bad arguments");
                return json!([]);
            }
        };
        let documents = self.retrieval.query(&input.question, input.domain.as_deref()).await;
        serde_json::to_value(documents).unwrap_or_else(|_| json!([]))
    }
}

// ── Query reformulation ─────────────────────────────────────────────────

const REFORMULATE_SYSTEM: &str = "You are a Query Reformulator for a hybrid-search RAG system.
Rewrite the user's free-form question into up to three concise, search-optimized queries for our vector KB. When reformulating:
 - Preserve the original intent and semantic meaning.
 - Emphasize core keywords and entities for exact-match retrieval.
 - Expand with relevant synonyms, abbreviations, and domain-specific terms.
 - Preserve numbers, dates, names, and technical keywords verbatim.
 - Remove filler words, polite framing, and stop-phrases.
 - Split compound questions into logical sub-queries using AND/OR where useful.
Answer with a JSON object of the form {\"questions\": [\"...\"]} and nothing else.";

const MAX_REFORMULATIONS: usize = 3;

#[derive(Debug, Deserialize)]
struct UnderstandQueryInput {
    query: String,
}

#[derive(Debug, Deserialize)]
struct Reformulations {
    questions: Vec<String>,
}

/// Rewrites the user's query into search-friendly variants with a one-shot model call.
pub struct UnderstandQuery {
    model: Arc<dyn LanguageModel>,
}

impl UnderstandQuery {
    pub const NAME: &'static str = "understandQuery";

    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Tool for UnderstandQuery {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "understand the users query. use this tool on every prompt."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "the users query" },
                "toolsToCallInOrder": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "these are the tools you need to call in the order necessary to respond to the users query"
                }
            },
            "required": ["query", "toolsToCallInOrder"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "array", "items": { "type": "string" }, "maxItems": MAX_REFORMULATIONS })
    }

    async fn execute(&self, input: Value) -> Value {
        let Ok(input) = serde_json::from_value::<UnderstandQueryInput>(input) else {
            return json!([]);
        };
        let request = ModelRequest {
            system: REFORMULATE_SYSTEM.to_string(),
            messages: vec![ModelMessage::User(vec![ContentPart::Text(format!(
                "Original query: \"{}\"",
                input.query
            ))])],
            tools: vec![],
        };

        let text = match self.model.complete(request).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "query reformulation failed");
                return json!([]);
            }
        };

        match serde_json::from_str::<Reformulations>(strip_code_fence(&text)) {
            Ok(r) => {
                let questions: Vec<String> = r
                    .questions
                    .into_iter()
                    .filter(|q| !q.trim().is_empty())
                    .take(MAX_REFORMULATIONS)
                    .collect();
                json!(questions)
            }
            Err(e) => {
                warn!(error = %e, "query reformulation was not valid JSON");
                json!([])
            }
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}
