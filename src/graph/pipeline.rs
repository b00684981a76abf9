use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use super::{GraphBuilder, GraphNode, NodeOutput, StateField, TaskGraph};
use crate::backends::{build_backends, Backends};
use crate::config::Config;
use crate::error::{AppResult, PipelineError, PipelineResult};
use crate::metrics::{build_metrics_sink, MetricsEvent, MetricsSink, Stage};
use crate::stages::{
    elapsed_ms, AnalysisState, ClassificationStage, FactCheckStage, NarrativeStage, SearchCache,
    StageCore, StageDefaults, VerificationStage, Verdict,
};

struct ClassificationNode(ClassificationStage);
struct NarrativeNode(NarrativeStage);
struct FactCheckNode(FactCheckStage);
struct VerificationNode(VerificationStage);

#[async_trait]
impl GraphNode for ClassificationNode {
    fn id(&self) -> &'static str {
        Stage::ManipulationClassifier.as_str()
    }

    fn inputs(&self) -> &'static [StateField] {
        &[StateField::Content, StateField::ContentId]
    }

    fn output(&self) -> StateField {
        StateField::Classification
    }

    async fn execute(&self, state: AnalysisState) -> NodeOutput {
        NodeOutput::Classification(self.0.run(&state).await)
    }
}

#[async_trait]
impl GraphNode for NarrativeNode {
    fn id(&self) -> &'static str {
        Stage::NarrativeExtractor.as_str()
    }

    fn inputs(&self) -> &'static [StateField] {
        &[
            StateField::Content,
            StateField::ContentId,
            StateField::Classification,
        ]
    }

    fn output(&self) -> StateField {
        StateField::Narrative
    }

    async fn execute(&self, state: AnalysisState) -> NodeOutput {
        NodeOutput::Narrative(self.0.run(&state).await)
    }
}

#[async_trait]
impl GraphNode for FactCheckNode {
    fn id(&self) -> &'static str {
        Stage::FactChecker.as_str()
    }

    // Entry node: runs alongside classification, so no narrative is available.
    fn inputs(&self) -> &'static [StateField] {
        &[StateField::Content, StateField::ContentId]
    }

    fn output(&self) -> StateField {
        StateField::FactCheck
    }

    async fn execute(&self, state: AnalysisState) -> NodeOutput {
        NodeOutput::FactCheck(self.0.run(&state, None).await)
    }
}

#[async_trait]
impl GraphNode for VerificationNode {
    fn id(&self) -> &'static str {
        Stage::Verifier.as_str()
    }

    fn inputs(&self) -> &'static [StateField] {
        &[
            StateField::Content,
            StateField::ContentId,
            StateField::Classification,
            StateField::Narrative,
            StateField::FactCheck,
        ]
    }

    fn output(&self) -> StateField {
        StateField::Verdict
    }

    async fn execute(&self, state: AnalysisState) -> NodeOutput {
        NodeOutput::Verdict(self.0.run(&state).await)
    }
}

/// The analysis pipeline: classification and fact-check fan out from the
/// content, narrative follows classification, verification joins all three.
#[derive(Clone)]
pub struct Pipeline {
    graph: TaskGraph,
    metrics: Arc<dyn MetricsSink>,
}

impl Pipeline {
    /// Wire the fixed analysis graph over the given backends.
    pub fn new(
        backends: Backends,
        metrics: Arc<dyn MetricsSink>,
        defaults: StageDefaults,
    ) -> PipelineResult<Self> {
        let core = StageCore::new(backends, Arc::clone(&metrics), defaults);

        let graph = GraphBuilder::new()
            .node(Arc::new(ClassificationNode(ClassificationStage::new(core.clone()))))
            .node(Arc::new(FactCheckNode(FactCheckStage::new(core.clone()))))
            .node(Arc::new(NarrativeNode(NarrativeStage::new(core.clone()))))
            .node(Arc::new(VerificationNode(VerificationStage::new(core))))
            .build()?;

        Ok(Self { graph, metrics })
    }

    /// Build backends, metrics sink and search cache from configuration.
    pub async fn from_config(config: &Config) -> AppResult<Self> {
        let backends = build_backends(config)?;
        let metrics = build_metrics_sink(&config.metrics).await?;

        let search_cache = match &config.pipeline.search_cache_path {
            Some(path) => Some(Arc::new(SearchCache::load(path)?)),
            None => None,
        };
        let defaults = StageDefaults {
            classifier: config.pipeline.classifier,
            threshold: config.scoring.threshold,
            use_search_cache: config.pipeline.use_search_cache,
            search_cache,
        };

        Ok(Self::new(backends, metrics, defaults)?)
    }

    /// The underlying task graph
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run the graph on an initial state.
    ///
    /// Fails only on an executor fault. Stage failures degrade into the
    /// verdict's explanation and blank content yields the no-content verdict.
    pub async fn run(&self, mut state: AnalysisState) -> PipelineResult<AnalysisState> {
        if state.content_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            state.content_id = Some(Uuid::new_v4().to_string());
        }
        let content_id = state.content_id().to_string();

        let start = Instant::now();
        info!(content_id = %content_id, content_len = state.content.len(), "Pipeline started");

        let result = self
            .graph
            .execute(state)
            .await
            .and_then(|state| match state.verdict {
                Some(_) => Ok(state),
                None => Err(PipelineError::MissingVerdict),
            });

        let event = MetricsEvent::new(Stage::PipelineComplete, content_id.clone());
        match result {
            Ok(state) => {
                let summary = state
                    .verdict
                    .as_ref()
                    .map(|v| {
                        json!({
                            "manipulation": v.manipulation,
                            "techniques_count": v.techniques.len(),
                            "disinfo_count": v.disinfo.len(),
                        })
                    })
                    .unwrap_or_default();
                let duration = elapsed_ms(start);
                info!(content_id = %content_id, duration_ms = duration, "Pipeline completed");
                self.metrics
                    .record(
                        event
                            .with_metrics(json!({ "total_duration_ms": duration }))
                            .success(summary, duration),
                    )
                    .await;
                Ok(state)
            }
            Err(e) => {
                let duration = elapsed_ms(start);
                error!(content_id = %content_id, error = %e, "Pipeline failed");
                self.metrics
                    .record(event.failure(e.to_string(), duration))
                    .await;
                Err(e)
            }
        }
    }

    /// Analyze one text and return its verdict.
    pub async fn analyze(&self, content: &str, content_id: Option<&str>) -> PipelineResult<Verdict> {
        let mut state = AnalysisState::new(content);
        state.content_id = content_id.map(str::to_string);
        self.run(state)
            .await?
            .verdict
            .ok_or(PipelineError::MissingVerdict)
    }
}
