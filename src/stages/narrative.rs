use serde_json::json;
use std::time::Instant;
use tracing::{info, warn};

use super::{elapsed_ms, AnalysisState, StageCore};
use crate::metrics::{MetricsEvent, Stage};
use crate::prompts::narrative_prompt;

/// Prefix of the narrative returned when generation fails.
pub const NARRATIVE_FAILED_PREFIX: &str = "Unable to extract narrative due to an error:";

/// Extracts a short narrative summary of the content.
#[derive(Clone)]
pub struct NarrativeStage {
    core: StageCore,
}

impl NarrativeStage {
    pub fn new(core: StageCore) -> Self {
        Self { core }
    }

    /// Produce the narrative. Uses the classification slot as context when present.
    pub async fn run(&self, state: &AnalysisState) -> String {
        let start = Instant::now();
        let content_id = state.content_id();
        let (techniques, probability) = state
            .classification
            .as_ref()
            .map(|c| (c.techniques.as_slice(), c.probability))
            .unwrap_or_default();

        let input = json!({
            "content_length": state.content.chars().count(),
            "techniques": techniques,
            "manipulation_probability": probability,
        });

        if !state.has_content() {
            self.record(content_id, input, "", techniques.len(), None, start)
                .await;
            return String::new();
        }

        let generation = self.core.generation(state);
        let prompt = narrative_prompt(&state.content, techniques, probability);

        match generation.generate(&prompt).await {
            Ok(narrative) => {
                info!(
                    content_id = %content_id,
                    narrative_len = narrative.len(),
                    "Narrative extracted"
                );
                self.record(content_id, input, &narrative, techniques.len(), None, start)
                    .await;
                narrative
            }
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    stage = %Stage::NarrativeExtractor,
                    error = %e,
                    "Narrative extraction failed"
                );
                let narrative = format!("{} {}", NARRATIVE_FAILED_PREFIX, e);
                self.record(
                    content_id,
                    input,
                    &narrative,
                    techniques.len(),
                    Some(e.to_string()),
                    start,
                )
                .await;
                narrative
            }
        }
    }

    async fn record(
        &self,
        content_id: &str,
        input: serde_json::Value,
        narrative: &str,
        techniques_count: usize,
        error: Option<String>,
        start: Instant,
    ) {
        let event = MetricsEvent::new(Stage::NarrativeExtractor, content_id)
            .with_input(input)
            .with_metrics(json!({
                "narrative_length": narrative.chars().count(),
                "techniques_count": techniques_count,
            }));
        let duration = elapsed_ms(start);
        let event = match error {
            Some(e) => event.failure(e, duration),
            None => event.success(json!({ "narrative": narrative }), duration),
        };
        self.core.metrics().record(event).await;
    }
}
