use std::sync::Arc;
use tracing::{info, warn};

use super::{
    build_scoring_registry, Backends, GeminiClient, GenerationBackend, LocalLlmClient,
    PerplexitySearch,
};
use crate::config::{Config, GenerationCandidate, GenerationConfig, GenerationProvider, RequestConfig};
use crate::error::{AppResult, BackendError, BackendResult};

/// Base URL for local servers when a candidate does not name one (LM Studio's default)
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://127.0.0.1:1234";

/// Resolve the ordered candidate list to the first usable generation backend.
///
/// A Gemini candidate is usable only when `GEMINI_API_KEY` is set; a local
/// candidate is always usable. Unusable candidates are skipped with a warning.
pub fn resolve_generation_backend(
    config: &GenerationConfig,
    request_config: &RequestConfig,
) -> BackendResult<Arc<dyn GenerationBackend>> {
    for candidate in &config.candidates {
        match build_candidate(candidate, config, request_config)? {
            Some(backend) => {
                info!(backend = %backend.name(), "Generation backend selected");
                return Ok(backend);
            }
            None => warn!(
                provider = %candidate.provider,
                model = %candidate.model,
                "Generation candidate not usable, trying next"
            ),
        }
    }

    Err(BackendError::MissingCredentials {
        backend: "generation".to_string(),
        env_var: "GEMINI_API_KEY".to_string(),
    })
}

fn build_candidate(
    candidate: &GenerationCandidate,
    config: &GenerationConfig,
    request_config: &RequestConfig,
) -> BackendResult<Option<Arc<dyn GenerationBackend>>> {
    match candidate.provider {
        GenerationProvider::Gemini => {
            let Some(api_key) = config.gemini_api_key.as_deref() else {
                return Ok(None);
            };
            let base_url = candidate
                .base_url
                .as_deref()
                .unwrap_or(&config.gemini_base_url);
            let client = GeminiClient::new(
                api_key,
                base_url,
                candidate.model.clone(),
                request_config.clone(),
            )?;
            Ok(Some(Arc::new(client)))
        }
        GenerationProvider::Local => {
            let base_url = candidate
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_LOCAL_BASE_URL);
            let client = LocalLlmClient::new(
                base_url,
                candidate.model.clone(),
                config.local_timeout_ms,
                request_config.clone(),
            )?;
            Ok(Some(Arc::new(client)))
        }
    }
}

/// Construct every process-wide backend from configuration.
///
/// Fails on missing generation credentials or an unknown default scoring key.
pub fn build_backends(config: &Config) -> AppResult<Backends> {
    let generation = resolve_generation_backend(&config.generation, &config.request)?;
    let scoring = build_scoring_registry(&config.scoring, &config.request)?;
    scoring.get(&config.scoring.default_model)?;
    let search = PerplexitySearch::new(&config.search, config.request.clone())?;

    if config.search.api_key.is_none() {
        warn!("PERPLEXITY_API_KEY not set, live fact-check search will return no results");
    }

    Ok(Backends {
        generation,
        scoring,
        default_scoring: config.scoring.default_model.clone(),
        search: Arc::new(search),
    })
}
