//! Append-only structured event log for pipeline stages.
//!
//! Every stage emits exactly one [`MetricsEvent`] per run; the executor adds a
//! `pipeline_complete` event. Sinks never fail the pipeline: persistence errors
//! are logged and dropped.

mod jsonl;
mod sqlite;

pub use jsonl::JsonlMetricsSink;
pub use sqlite::SqliteMetricsSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::config::{MetricsConfig, MetricsSinkKind};
use crate::error::StorageResult;

/// Pipeline step that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ManipulationClassifier,
    NarrativeExtractor,
    FactChecker,
    Verifier,
    PipelineComplete,
    /// Per-item failure while building the search cache
    CacheSearchError,
}

impl Stage {
    /// Wire name of the stage
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ManipulationClassifier => "manipulation_classifier",
            Stage::NarrativeExtractor => "narrative_extractor",
            Stage::FactChecker => "fact_checker",
            Stage::Verifier => "verifier",
            Stage::PipelineComplete => "pipeline_complete",
            Stage::CacheSearchError => "cache_search_error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manipulation_classifier" => Ok(Stage::ManipulationClassifier),
            "narrative_extractor" => Ok(Stage::NarrativeExtractor),
            "fact_checker" => Ok(Stage::FactChecker),
            "verifier" => Ok(Stage::Verifier),
            "pipeline_complete" => Ok(Stage::PipelineComplete),
            "cache_search_error" => Ok(Stage::CacheSearchError),
            other => Err(format!("Unknown stage: {}", other)),
        }
    }
}

/// A single metrics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    /// Unique event identifier.
    pub id: String,
    pub stage: Stage,
    pub content_id: String,
    /// Wall-clock duration of the step in milliseconds.
    pub duration_ms: i64,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    /// Stage-specific figures (counts, scores, flags).
    pub metrics: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MetricsEvent {
    /// Create a new successful event with no payload
    pub fn new(stage: Stage, content_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stage,
            content_id: content_id.into(),
            duration_ms: 0,
            input: None,
            output: None,
            metrics: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the step input
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Attach stage-specific metrics
    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, duration_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.duration_ms = duration_ms;
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, duration_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.duration_ms = duration_ms;
        self
    }
}

/// Destination for metrics events. Safe for concurrent use.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Append one event. Must not fail or block the caller on persistence errors.
    async fn record(&self, event: MetricsEvent);
}

/// In-memory sink used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    events: Mutex<Vec<MetricsEvent>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in insertion order
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events for one stage
    pub fn events_for(&self, stage: Stage) -> Vec<MetricsEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn record(&self, event: MetricsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Build the sink selected by configuration.
pub async fn build_metrics_sink(config: &MetricsConfig) -> StorageResult<Arc<dyn MetricsSink>> {
    let sink: Arc<dyn MetricsSink> = match config.sink {
        MetricsSinkKind::Sqlite => Arc::new(SqliteMetricsSink::new(config).await?),
        MetricsSinkKind::Jsonl => Arc::new(JsonlMetricsSink::new(&config.log_dir)),
        MetricsSinkKind::Memory => Arc::new(MemoryMetricsSink::new()),
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = MetricsEvent::new(Stage::Verifier, "c1")
            .with_input(json!({"content_length": 10}))
            .success(json!({"manipulation": false}), 42);

        assert_eq!(event.stage, Stage::Verifier);
        assert_eq!(event.content_id, "c1");
        assert_eq!(event.duration_ms, 42);
        assert!(event.success);
        assert!(event.error.is_none());
    }

    #[test]
    fn test_event_failure() {
        let event = MetricsEvent::new(Stage::FactChecker, "c1").failure("boom", 7);
        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert!(event.output.is_none());
    }

    #[test]
    fn test_stage_names_roundtrip() {
        for stage in [
            Stage::ManipulationClassifier,
            Stage::NarrativeExtractor,
            Stage::FactChecker,
            Stage::Verifier,
            Stage::PipelineComplete,
            Stage::CacheSearchError,
        ] {
            let parsed: Stage = stage.as_str().parse().unwrap();
            assert_eq!(parsed, stage);
            assert_eq!(
                serde_json::to_value(stage).unwrap(),
                json!(stage.as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryMetricsSink::new();
        sink.record(MetricsEvent::new(Stage::FactChecker, "a")).await;
        sink.record(MetricsEvent::new(Stage::Verifier, "a")).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, Stage::Verifier);
        assert_eq!(sink.events_for(Stage::FactChecker).len(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_survives_poisoned_lock() {
        let sink = Arc::new(MemoryMetricsSink::new());
        sink.record(MetricsEvent::new(Stage::FactChecker, "a")).await;

        let poisoner = Arc::clone(&sink);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.events.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(sink.events.is_poisoned());

        sink.record(MetricsEvent::new(Stage::Verifier, "a")).await;
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, Stage::Verifier);
    }
}
