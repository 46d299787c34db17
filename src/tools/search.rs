//! Web search executor and HTTP search client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::tool::{parse_args, ToolExecutionContext, ToolExecutor};
use super::types::{SideEffect, ToolExecutionResult, ToolParameters};
use crate::error::{KilnError, Result};
use crate::provider::http::{error_from_response, shared_client};

const DEFAULT_MAX_RESULTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Web-search collaborator.
#[async_trait]
pub trait SearchService: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>>;
}

/// Tavily-style JSON search endpoint client.
pub struct HttpSearchService {
    endpoint: String,
    api_key: String,
}

impl HttpSearchService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl SearchService for HttpSearchService {
    fn provider_name(&self) -> &str {
        "http"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
        });
        let request = shared_client().post(&self.endpoint).json(&body).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(KilnError::Canceled),
            resp = request => resp?,
        };
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let data: SearchResponse = resp.json().await?;
        Ok(data
            .results
            .into_iter()
            .take(max_results as usize)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
}

/// `web_search` executor.
pub struct WebSearchTool {
    service: Arc<dyn SearchService>,
    parameters: ToolParameters,
}

impl WebSearchTool {
    pub const NAME: &'static str = "web_search";

    pub fn new(service: Arc<dyn SearchService>) -> Self {
        Self {
            service,
            parameters: ToolParameters::object()
                .bounded_string("query", "What to search the web for", 1, 400, true)
                .integer("max_results", "Maximum results to return", 1, 10, false)
                .build(),
        }
    }
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with snippets"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult> {
        let args: SearchArgs = parse_args(args)?;
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let hits = self
            .service
            .search(&args.query, max_results, &ctx.cancel)
            .await?;

        Ok(ToolExecutionResult::success(serde_json::json!({
            "query": args.query,
            "results": hits,
        }))
        .with_side_effect(SideEffect::SearchPerformed {
            provider: self.service.provider_name().to_string(),
            query: args.query,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_search_maps_results_and_honors_the_cap() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(serde_json::json!({"query": "rust", "max_results": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": "Rust", "url": "https://rust-lang.org", "content": "A language"},
                    {"title": "Other", "url": "https://example.com", "content": "Ignored"}
                ]
            })))
            .mount(&server)
            .await;
        let service = HttpSearchService::new(format!("{}/search", server.uri()), "key");

        let hits = service
            .search("rust", 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            hits,
            vec![SearchHit {
                title: "Rust".into(),
                url: "https://rust-lang.org".into(),
                snippet: "A language".into(),
            }]
        );
    }

    #[tokio::test]
    async fn http_search_failure_is_an_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let service = HttpSearchService::new(format!("{}/search", server.uri()), "key");

        let err = service
            .search("rust", 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, KilnError::Upstream { status: 500, .. }));
    }
}
