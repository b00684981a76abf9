use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::http::{call_with_retries, ensure_success, transport_error};
use super::{SearchBackend, SearchResult};
use crate::config::{RequestConfig, SearchConfig};
use crate::error::{BackendError, BackendResult};

const SYSTEM_PROMPT: &str =
    "You are a search assistant. Provide factual search results with source URLs.";
const CITATION_SNIPPET_CHARS: usize = 200;
const ANSWER_SNIPPET_CHARS: usize = 500;
/// Placeholder URL for an answer that came back without citations
pub const UNCITED_RESULT_URL: &str = "perplexity_search";

/// Web search through Perplexity's chat completions API.
///
/// Each citation becomes one result sharing the head of the answer as its
/// snippet. Never fails: a missing API key or any provider error yields an
/// empty list.
#[derive(Clone)]
pub struct PerplexitySearch {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    domain_filter: Vec<String>,
    request_config: RequestConfig,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    search_domain_filter: &'a [String],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl PerplexitySearch {
    /// Create a new search client. Denied domains are sent as `-domain` filters.
    pub fn new(config: &SearchConfig, request_config: RequestConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            domain_filter: config
                .denied_domains
                .iter()
                .map(|d| format!("-{}", d.trim_start_matches('-')))
                .collect(),
            request_config,
        })
    }

    /// Domain filter sent with every query
    pub fn domain_filter(&self) -> &[String] {
        &self.domain_filter
    }

    async fn execute_request(&self, api_key: &str, query: &str) -> BackendResult<SearchResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = SearchRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: query,
                },
            ],
            search_domain_filter: &self.domain_filter,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_config.timeout_ms))?;
        let response = ensure_success(response).await?;

        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("Failed to parse search response: {}", e),
            })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn into_results(response: SearchResponse, max_results: usize) -> Vec<SearchResult> {
    let answer = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default();

    if !response.citations.is_empty() {
        let snippet = truncate_chars(&answer, CITATION_SNIPPET_CHARS);
        return response
            .citations
            .into_iter()
            .take(max_results)
            .map(|url| SearchResult {
                url,
                snippet: snippet.clone(),
            })
            .collect();
    }

    if answer.is_empty() {
        return Vec::new();
    }
    vec![SearchResult {
        url: UNCITED_RESULT_URL.to_string(),
        snippet: truncate_chars(&answer, ANSWER_SNIPPET_CHARS),
    }]
}

#[async_trait]
impl SearchBackend for PerplexitySearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(query = %query, "PERPLEXITY_API_KEY not set, search skipped");
            return Vec::new();
        };

        debug!(query = %query, max_results, "Running web search");
        match call_with_retries("perplexity", &self.request_config, || {
            self.execute_request(api_key, query)
        })
        .await
        {
            Ok(response) => into_results(response, max_results),
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed");
                Vec::new()
            }
        }
    }
}
