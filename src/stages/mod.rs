//! Analysis stages.
//!
//! Each stage reads the fields it needs from an [`AnalysisState`], calls its
//! backends, and returns its own output slot. Stages never fail: backend
//! errors are caught here, logged with the stage and content id, recorded to
//! the metrics sink and turned into the documented fallback output.
//!
//! - [`ClassificationStage`]: manipulation probability and techniques
//! - [`NarrativeStage`]: short narrative summary
//! - [`FactCheckStage`]: queries, evidence, synthesis (optionally from [`SearchCache`])
//! - [`VerificationStage`]: final [`Verdict`] with the consistency rule

mod cache;
mod classification;
mod fact_check;
mod narrative;
mod types;
mod verification;

pub use cache::{CacheItem, CachedSearch, SearchCache, SearchCacheBuilder};
pub use classification::{decide, ClassificationStage, PROMPT_THRESHOLD};
pub use fact_check::{FactCheckStage, FACT_CHECK_FAILED_PREFIX, NO_CONTENT_FOR_FACT_CHECK};
pub use narrative::{NarrativeStage, NARRATIVE_FAILED_PREFIX};
pub use types::*;
pub use verification::{VerificationStage, NO_CONTENT_EXPLANATION};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::backends::{Backends, GenerationBackend};
use crate::metrics::MetricsSink;

/// How the classification stage produces its estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierStrategy {
    /// Threshold decision over a scoring backend.
    #[default]
    Scoring,
    /// JSON answer from the generation backend.
    Prompt,
}

impl ClassifierStrategy {
    /// Get the strategy name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierStrategy::Scoring => "scoring",
            ClassifierStrategy::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for ClassifierStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClassifierStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scoring" => Ok(ClassifierStrategy::Scoring),
            "prompt" | "llm" => Ok(ClassifierStrategy::Prompt),
            other => Err(format!(
                "Unknown classifier strategy: {}. Must be 'scoring' or 'prompt'",
                other
            )),
        }
    }
}

/// Process-wide defaults applied when a run does not override them.
#[derive(Debug, Clone, Default)]
pub struct StageDefaults {
    pub classifier: ClassifierStrategy,
    /// Overrides every scoring backend's own default threshold.
    pub threshold: Option<f64>,
    pub use_search_cache: bool,
    pub search_cache: Option<Arc<SearchCache>>,
}

/// Shared dependencies for all stages.
#[derive(Clone)]
pub struct StageCore {
    backends: Backends,
    metrics: Arc<dyn MetricsSink>,
    defaults: StageDefaults,
}

impl StageCore {
    /// Create a new stage core.
    pub fn new(backends: Backends, metrics: Arc<dyn MetricsSink>, defaults: StageDefaults) -> Self {
        Self {
            backends,
            metrics,
            defaults,
        }
    }

    #[inline]
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    #[inline]
    pub fn defaults(&self) -> &StageDefaults {
        &self.defaults
    }

    /// Generation backend for this run: the override if set, else the process default.
    pub fn generation(&self, state: &AnalysisState) -> Arc<dyn GenerationBackend> {
        state
            .overrides
            .generation
            .clone()
            .unwrap_or_else(|| self.backends.generation.clone())
    }
}

/// Serialize a value to JSON for metrics, with warning on failure.
pub(crate) fn serialize_for_log<T: serde::Serialize>(
    value: &T,
    context: &str,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for metrics event"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Milliseconds elapsed since `start`, saturating.
pub(crate) fn elapsed_ms(start: std::time::Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}
