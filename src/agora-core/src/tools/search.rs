use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{Tool, string_arg};
use crate::error::ToolError;

const TOOL_NAME: &str = "web_search";

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "content", alias = "description")]
    pub snippet: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Hits(Vec<SearchHit>),
    Wrapped { results: Vec<SearchHit> },
}

/// Web search over an HTTP JSON endpoint.
///
/// The endpoint receives `GET <endpoint>?q=<query>&limit=<n>` and answers with
/// either a list of hits or `{"results": [...]}`.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, max_results: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            max_results: max_results.max(1),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |message: String| ToolError::Execution {
            tool: TOOL_NAME.to_string(),
            message,
        };

        let limit = self.max_results.to_string();
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("limit", limit.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failed(e.to_string()))?;
        let body: SearchResponse = response.json().await.map_err(|e| failed(e.to_string()))?;

        let mut hits = match body {
            SearchResponse::Hits(hits) => hits,
            SearchResponse::Wrapped { results } => results,
        };
        hits.truncate(self.max_results);
        debug!(query, hits = hits.len(), "search finished");
        Ok(hits)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web. Returns a list of results with title, url and snippet."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string", "description": "Search query" } },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let query = string_arg(TOOL_NAME, &args, "query")?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: TOOL_NAME.to_string(),
                message: "query is empty".to_string(),
            });
        }
        let hits = self.search(&query).await?;
        serde_json::to_string_pretty(&hits).map_err(|e| ToolError::Execution {
            tool: TOOL_NAME.to_string(),
            message: e.to_string(),
        })
    }
}
