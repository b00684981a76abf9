//! External collaborators behind narrow contracts.
//!
//! - [`GenerationBackend`]: prompt in, text out (Gemini, local OpenAI-compatible servers)
//! - [`ScoringBackend`]: content classification models (binary or multi-label)
//! - [`SearchBackend`]: web search returning ranked `{url, snippet}` pairs
//!
//! Every backend is constructed once per process and shared read-only through
//! [`Backends`].

mod factory;
mod gemini;
mod http;
mod openai_compat;
mod scoring;
mod search;

pub use factory::*;
pub use gemini::GeminiClient;
pub use openai_compat::LocalLlmClient;
pub use scoring::*;
pub use search::{PerplexitySearch, UNCITED_RESULT_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BackendError, BackendResult};

/// A large language model exposed as a single prompt → text capability.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text for the prompt. Failures must be reported as errors.
    async fn generate(&self, prompt: &str) -> BackendResult<String>;

    /// Identifier used in logs and metrics (e.g. `gemini:gemini-2.5-flash`).
    fn name(&self) -> String;
}

/// Static property of a scoring model: how its output must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringKind {
    /// One scalar for the whole content.
    Binary,
    /// One scalar per named category.
    MultiLabel,
}

/// A single `(label, score)` pair produced by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Raw scoring output, before any thresholding.
#[derive(Debug, Clone, PartialEq)]
pub enum Scores {
    Single(LabelScore),
    Multi(Vec<LabelScore>),
}

/// An opaque content-classification model.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Score the content.
    async fn score(&self, content: &str) -> BackendResult<Scores>;

    /// Binary or multi-label; fixed for the lifetime of the backend.
    fn kind(&self) -> ScoringKind;

    /// Threshold applied when a run does not override it.
    fn default_threshold(&self) -> f64;
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub snippet: String,
}

/// A web search provider.
///
/// Implementations never fail: missing credentials or provider errors yield an
/// empty list.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult>;
}

/// Scoring backends constructed at startup, addressable by key.
#[derive(Clone, Default)]
pub struct ScoringRegistry {
    backends: HashMap<String, Arc<dyn ScoringBackend>>,
}

impl ScoringRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `key`, replacing any previous one.
    pub fn with_backend(mut self, key: impl Into<String>, backend: Arc<dyn ScoringBackend>) -> Self {
        self.backends.insert(key.into(), backend);
        self
    }

    /// Look up a backend by key.
    pub fn get(&self, key: &str) -> BackendResult<Arc<dyn ScoringBackend>> {
        self.backends
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend {
                key: key.to_string(),
                available: self.keys().join(", "),
            })
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.backends.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// All process-wide backend clients, injected into the pipeline.
#[derive(Clone)]
pub struct Backends {
    pub generation: Arc<dyn GenerationBackend>,
    pub scoring: ScoringRegistry,
    /// Key of the scoring backend used when a run does not choose one.
    pub default_scoring: String,
    pub search: Arc<dyn SearchBackend>,
}
