use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::http::{call_with_retries, ensure_success, transport_error};
use super::{LabelScore, ScoringBackend, ScoringKind, ScoringRegistry, Scores};
use crate::config::{RequestConfig, ScoringConfig};
use crate::error::{BackendError, BackendResult};

/// Static description of a hosted classification model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringModelSpec {
    /// Registry key (e.g. `lapa-llm`)
    pub key: &'static str,
    /// Hosted model identifier
    pub model_id: &'static str,
    pub kind: ScoringKind,
    pub default_threshold: f64,
}

/// Models known to the scoring registry.
pub const SCORING_MODELS: &[ScoringModelSpec] = &[
    ScoringModelSpec {
        key: "lapa-llm",
        model_id: "lapa-llm/manipulative-score-model",
        kind: ScoringKind::Binary,
        default_threshold: 0.5,
    },
    ScoringModelSpec {
        key: "modern-bert",
        model_id: "olehmell/ukr-manipulation-detector-modern-bert-2048-checkpoint-2870",
        kind: ScoringKind::MultiLabel,
        default_threshold: 0.15,
    },
];

/// Look up a known model spec by registry key.
pub fn scoring_model_spec(key: &str) -> Option<&'static ScoringModelSpec> {
    SCORING_MODELS.iter().find(|spec| spec.key == key)
}

/// Text-classification model served over an inference HTTP endpoint.
///
/// Sends `{"inputs": content}` to `{base_url}/models/{model_id}` and accepts
/// either a flat list of `{label, score}` objects or a list nested one level
/// deeper, which is how batched inference endpoints answer a single input.
#[derive(Clone)]
pub struct HttpScoringBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    spec: ScoringModelSpec,
    request_config: RequestConfig,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_labels(self) -> Vec<LabelScore> {
        match self {
            InferenceResponse::Nested(outer) => outer.into_iter().next().unwrap_or_default(),
            InferenceResponse::Flat(labels) => labels,
        }
    }
}

impl HttpScoringBackend {
    /// Create a new scoring backend for the given model
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        spec: ScoringModelSpec,
        request_config: RequestConfig,
    ) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            spec,
            request_config,
        })
    }

    /// The model this backend serves
    pub fn spec(&self) -> &ScoringModelSpec {
        &self.spec
    }

    async fn execute_request(&self, content: &str) -> BackendResult<Vec<LabelScore>> {
        let url = format!("{}/models/{}", self.base_url, self.spec.model_id);
        debug!(model = %self.spec.key, content_len = content.len(), "Calling scoring model");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "inputs": content }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_config.timeout_ms))?;
        let response = ensure_success(response).await?;

        let parsed: InferenceResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    message: format!("Failed to parse scoring response: {}", e),
                })?;

        Ok(parsed.into_labels())
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringBackend {
    async fn score(&self, content: &str) -> BackendResult<Scores> {
        let name = format!("scoring:{}", self.spec.key);
        let labels =
            call_with_retries(&name, &self.request_config, || self.execute_request(content))
                .await?;

        match self.spec.kind {
            ScoringKind::Binary => labels
                .into_iter()
                .max_by(|a, b| a.score.total_cmp(&b.score))
                .map(Scores::Single)
                .ok_or_else(|| BackendError::InvalidResponse {
                    message: "Scoring model returned no labels".to_string(),
                }),
            ScoringKind::MultiLabel => Ok(Scores::Multi(labels)),
        }
    }

    fn kind(&self) -> ScoringKind {
        self.spec.kind
    }

    fn default_threshold(&self) -> f64 {
        self.spec.default_threshold
    }
}

/// Build the scoring registry with one backend per known model.
pub fn build_scoring_registry(
    config: &ScoringConfig,
    request_config: &RequestConfig,
) -> BackendResult<ScoringRegistry> {
    let mut registry = ScoringRegistry::new();
    for spec in SCORING_MODELS {
        let backend = HttpScoringBackend::new(
            &config.base_url,
            config.api_key.clone(),
            *spec,
            request_config.clone(),
        )?;
        registry = registry.with_backend(spec.key, Arc::new(backend));
    }
    info!(models = ?registry.keys(), "Scoring registry built");
    Ok(registry)
}
