use serde_json::json;
use std::time::Instant;
use tracing::{info, warn};

use super::{
    elapsed_ms, extract_json_from_completion, serialize_for_log, AnalysisState,
    ClassificationOutput, StageCore, TechniqueSet, Verdict, PROMPT_THRESHOLD,
};
use crate::error::BackendError;
use crate::metrics::{MetricsEvent, Stage};
use crate::prompts::{verifier_prompt, VerifierInputs};

/// Explanation of the verdict for empty content.
pub const NO_CONTENT_EXPLANATION: &str = "No content provided for analysis";

/// How the verdict was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerdictSource {
    Model,
    ParseFallback,
    BackendFallback,
    NoContent,
}

impl VerdictSource {
    fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Model => "none",
            VerdictSource::ParseFallback => "parse",
            VerdictSource::BackendFallback => "backend",
            VerdictSource::NoContent => "no_content",
        }
    }
}

/// Upstream findings as seen by the verifier.
struct Upstream<'a> {
    probability: f64,
    threshold: f64,
    crossed: bool,
    techniques: TechniqueSet,
    narrative: &'a str,
    fact_check: &'a str,
}

impl<'a> Upstream<'a> {
    fn from_state(state: &'a AnalysisState) -> Self {
        let classification = state
            .classification
            .clone()
            .unwrap_or_else(|| ClassificationOutput::empty_prompted(PROMPT_THRESHOLD));
        Self {
            probability: classification.probability,
            threshold: classification.threshold,
            crossed: classification.crossed_threshold(),
            techniques: classification.techniques,
            narrative: state.narrative.as_deref().unwrap_or(""),
            fact_check: state
                .fact_check
                .as_ref()
                .map(|f| f.summary.as_str())
                .unwrap_or(""),
        }
    }

    /// Verdict built from upstream fields alone.
    fn fallback(&self, error: Option<&BackendError>) -> Verdict {
        let mut explanation = format!(
            "Analysis completed. Manipulation probability: {:.3}. {} {}",
            self.probability, self.narrative, self.fact_check
        );
        if let Some(e) = error {
            explanation.push_str(&format!(" Error: {}", e));
        }

        Verdict {
            manipulation: self.probability >= self.threshold && !self.techniques.is_empty(),
            techniques: self.techniques.clone(),
            disinfo: Vec::new(),
            explanation,
        }
    }

    /// Enforce the consistency rule on a model verdict.
    fn reconcile(&self, mut verdict: Verdict) -> Verdict {
        let has_findings = !verdict.techniques.is_empty() || !verdict.disinfo.is_empty();
        verdict.manipulation = verdict.manipulation && self.crossed && has_findings;
        verdict
    }
}

/// Produces the final verdict.
#[derive(Clone)]
pub struct VerificationStage {
    core: StageCore,
}

impl VerificationStage {
    pub fn new(core: StageCore) -> Self {
        Self { core }
    }

    /// Produce the verdict. Never fails.
    pub async fn run(&self, state: &AnalysisState) -> Verdict {
        let start = Instant::now();
        let content_id = state.content_id();
        let upstream = Upstream::from_state(state);
        let input = json!({
            "content_length": state.content.chars().count(),
            "manipulation_probability": upstream.probability,
            "threshold": upstream.threshold,
            "techniques": upstream.techniques,
            "narrative_length": upstream.narrative.chars().count(),
            "fact_check_length": upstream.fact_check.chars().count(),
        });

        if !state.has_content() {
            let verdict = Verdict {
                manipulation: false,
                techniques: TechniqueSet::new(),
                disinfo: Vec::new(),
                explanation: NO_CONTENT_EXPLANATION.to_string(),
            };
            self.record(content_id, input, &verdict, VerdictSource::NoContent, None, start)
                .await;
            return verdict;
        }

        let prompt = verifier_prompt(&VerifierInputs {
            content: &state.content,
            probability: upstream.probability,
            threshold: upstream.threshold,
            techniques: upstream.techniques.as_slice(),
            narrative: upstream.narrative,
            fact_check: upstream.fact_check,
        });

        let generation = self.core.generation(state);
        let (verdict, source, error) = match generation.generate(&prompt).await {
            Ok(completion) => match parse_verdict(&completion) {
                Ok(parsed) => (upstream.reconcile(parsed), VerdictSource::Model, None),
                Err(e) => {
                    warn!(
                        content_id = %content_id,
                        stage = %Stage::Verifier,
                        error = %e,
                        "Unparseable verdict, rebuilding from upstream"
                    );
                    (upstream.fallback(None), VerdictSource::ParseFallback, Some(e))
                }
            },
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    stage = %Stage::Verifier,
                    error = %e,
                    "Verification failed, rebuilding from upstream"
                );
                let verdict = upstream.fallback(Some(&e));
                (verdict, VerdictSource::BackendFallback, Some(e.to_string()))
            }
        };

        info!(
            content_id = %content_id,
            manipulation = verdict.manipulation,
            techniques = verdict.techniques.len(),
            disinfo = verdict.disinfo.len(),
            fallback = source.as_str(),
            "Verification completed"
        );
        self.record(content_id, input, &verdict, source, error, start)
            .await;
        verdict
    }

    async fn record(
        &self,
        content_id: &str,
        input: serde_json::Value,
        verdict: &Verdict,
        source: VerdictSource,
        error: Option<String>,
        start: Instant,
    ) {
        let mut event = MetricsEvent::new(Stage::Verifier, content_id)
            .with_input(input)
            .with_metrics(json!({
                "manipulation": verdict.manipulation,
                "techniques_count": verdict.techniques.len(),
                "disinfo_count": verdict.disinfo.len(),
                "fallback": source.as_str(),
            }))
            .success(serialize_for_log(verdict, "verdict"), elapsed_ms(start));
        // The verdict is always produced; only a backend failure marks the step failed.
        if let Some(e) = error {
            if source == VerdictSource::BackendFallback {
                event.success = false;
            }
            event.error = Some(e);
        }
        self.core.metrics().record(event).await;
    }
}

fn parse_verdict(completion: &str) -> Result<Verdict, String> {
    let json_str = extract_json_from_completion(completion)?;
    serde_json::from_str(json_str).map_err(|e| format!("Failed to parse verdict JSON: {}", e))
}
