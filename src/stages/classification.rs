use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{
    elapsed_ms, extract_json_from_completion, serialize_for_log, AnalysisState,
    ClassificationOutput, ClassifierStrategy, StageCore, Technique, TechniqueSet,
};
use crate::backends::{scoring_model_spec, ScoringBackend, ScoringKind, Scores};
use crate::error::{BackendError, BackendResult};
use crate::metrics::{MetricsEvent, Stage};

/// Decision threshold of the prompt strategy.
pub const PROMPT_THRESHOLD: f64 = 0.5;

/// Fallback when neither the run, the process nor the model names a threshold.
const FALLBACK_THRESHOLD: f64 = 0.5;

/// Turn raw scores into `(score, techniques, is_manipulation)`.
///
/// Binary: one score, flipped to `1 - score` when the label names the
/// non-manipulative class. Multi-label: every category strictly above the
/// threshold becomes a technique and the score is the maximum. In both cases
/// `is_manipulation = score >= threshold`.
pub fn decide(scores: &Scores, kind: ScoringKind, threshold: f64) -> (f64, TechniqueSet, bool) {
    let (score, techniques) = match kind {
        ScoringKind::Binary => {
            let top = match scores {
                Scores::Single(label) => Some(label),
                Scores::Multi(labels) => labels.iter().max_by(|a, b| a.score.total_cmp(&b.score)),
            };
            let score = top
                .map(|l| {
                    if denotes_negative_class(&l.label) {
                        1.0 - l.score
                    } else {
                        l.score
                    }
                })
                .unwrap_or(0.0);
            (score, TechniqueSet::new())
        }
        ScoringKind::MultiLabel => {
            let labels = match scores {
                Scores::Single(label) => std::slice::from_ref(label),
                Scores::Multi(labels) => labels.as_slice(),
            };
            let mut techniques = TechniqueSet::new();
            let mut score: f64 = 0.0;
            for label in labels {
                if label.score > threshold {
                    if let Some(technique) = Technique::from_label(&label.label) {
                        techniques.insert(technique);
                    }
                }
                score = score.max(label.score);
            }
            (score, techniques)
        }
    };

    let score = score.clamp(0.0, 1.0);
    (score, techniques, score >= threshold)
}

/// First threshold in `candidates` that lies within [0, 1].
///
/// Out-of-range and NaN values are skipped with a warning.
fn resolve_threshold(candidates: &[(&str, Option<f64>)]) -> f64 {
    for (source, value) in candidates {
        match value {
            Some(t) if (0.0..=1.0).contains(t) => return *t,
            Some(t) => warn!(source = %source, threshold = %t, "Ignoring threshold outside [0, 1]"),
            None => {}
        }
    }
    FALLBACK_THRESHOLD
}

fn denotes_negative_class(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("not") || label.contains("non") || label == "0"
}

#[derive(Debug, Deserialize)]
struct PromptClassification {
    manipulation_probability: f64,
    #[serde(default)]
    manipulation_techniques: TechniqueSet,
}

/// Manipulation classifier with interchangeable strategies.
#[derive(Clone)]
pub struct ClassificationStage {
    core: StageCore,
}

impl ClassificationStage {
    pub fn new(core: StageCore) -> Self {
        Self { core }
    }

    /// Classify the state's content. Never fails.
    pub async fn run(&self, state: &AnalysisState) -> ClassificationOutput {
        let strategy = state
            .overrides
            .classifier
            .unwrap_or(self.core.defaults().classifier);

        match strategy {
            ClassifierStrategy::Scoring => self.run_scoring(state).await,
            ClassifierStrategy::Prompt => self.run_prompt(state).await,
        }
    }

    fn scoring_key(&self, state: &AnalysisState) -> String {
        state
            .overrides
            .scoring_model
            .clone()
            .unwrap_or_else(|| self.core.backends().default_scoring.clone())
    }

    fn scoring_threshold(&self, state: &AnalysisState, key: &str, model_default: Option<f64>) -> f64 {
        resolve_threshold(&[
            ("run override", state.overrides.threshold),
            ("configured default", self.core.defaults().threshold),
            ("backend default", model_default),
            ("model spec", scoring_model_spec(key).map(|s| s.default_threshold)),
        ])
    }

    async fn run_scoring(&self, state: &AnalysisState) -> ClassificationOutput {
        let start = Instant::now();
        let content_id = state.content_id();
        let key = self.scoring_key(state);
        let backend = self.core.backends().scoring.get(&key);
        let threshold = self.scoring_threshold(
            state,
            &key,
            backend.as_ref().ok().map(|b| b.default_threshold()),
        );

        let input = json!({
            "content_length": state.content.chars().count(),
            "strategy": ClassifierStrategy::Scoring.as_str(),
            "model": key,
            "threshold": threshold,
        });

        if !state.has_content() {
            let output = ClassificationOutput::empty_scored(threshold);
            self.record(content_id, input, &output, None, start).await;
            return output;
        }

        let result = match backend {
            Ok(backend) => score_content(backend.as_ref(), &state.content, threshold).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                info!(
                    content_id = %content_id,
                    model = %key,
                    score = output.probability,
                    threshold,
                    techniques = output.techniques.len(),
                    "Classification completed"
                );
                self.record(content_id, input, &output, None, start).await;
                output
            }
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    stage = %Stage::ManipulationClassifier,
                    model = %key,
                    error = %e,
                    "Scoring failed, using empty classification"
                );
                let output = ClassificationOutput::empty_scored(threshold);
                self.record(content_id, input, &output, Some(e.to_string()), start)
                    .await;
                output
            }
        }
    }

    async fn run_prompt(&self, state: &AnalysisState) -> ClassificationOutput {
        let start = Instant::now();
        let content_id = state.content_id();
        let generation = self.core.generation(state);

        let input = json!({
            "content_length": state.content.chars().count(),
            "strategy": ClassifierStrategy::Prompt.as_str(),
            "model": generation.name(),
            "threshold": PROMPT_THRESHOLD,
        });

        if !state.has_content() {
            let output = ClassificationOutput::empty_prompted(PROMPT_THRESHOLD);
            self.record(content_id, input, &output, None, start).await;
            return output;
        }

        let prompt = crate::prompts::classifier_prompt(&state.content);
        let result = generation
            .generate(&prompt)
            .await
            .and_then(|completion| parse_prompt_classification(&completion));

        match result {
            Ok(output) => {
                info!(
                    content_id = %content_id,
                    probability = output.probability,
                    techniques = output.techniques.len(),
                    "Prompt classification completed"
                );
                self.record(content_id, input, &output, None, start).await;
                output
            }
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    stage = %Stage::ManipulationClassifier,
                    error = %e,
                    "Prompt classification failed, using empty classification"
                );
                let output = ClassificationOutput::empty_prompted(PROMPT_THRESHOLD);
                self.record(content_id, input, &output, Some(e.to_string()), start)
                    .await;
                output
            }
        }
    }

    async fn record(
        &self,
        content_id: &str,
        input: serde_json::Value,
        output: &ClassificationOutput,
        error: Option<String>,
        start: Instant,
    ) {
        let event = MetricsEvent::new(Stage::ManipulationClassifier, content_id)
            .with_input(input)
            .with_metrics(json!({
                "manipulation_probability": output.probability,
                "techniques_count": output.techniques.len(),
                "is_manipulation": output.is_manipulation,
            }));
        let duration = elapsed_ms(start);
        let event = match error {
            Some(e) => event.failure(e, duration),
            None => event.success(serialize_for_log(output, "classification output"), duration),
        };
        self.core.metrics().record(event).await;
    }
}

async fn score_content(
    backend: &dyn ScoringBackend,
    content: &str,
    threshold: f64,
) -> BackendResult<ClassificationOutput> {
    let scores = backend.score(content).await?;
    let (score, techniques, is_manipulation) = decide(&scores, backend.kind(), threshold);
    Ok(ClassificationOutput {
        probability: score,
        techniques,
        is_manipulation: Some(is_manipulation),
        score: Some(score),
        threshold,
    })
}

fn parse_prompt_classification(completion: &str) -> BackendResult<ClassificationOutput> {
    let json_str = extract_json_from_completion(completion)
        .map_err(|message| BackendError::InvalidResponse { message })?;
    let parsed: PromptClassification =
        serde_json::from_str(json_str).map_err(|e| BackendError::InvalidResponse {
            message: format!("Failed to parse classification JSON: {}", e),
        })?;

    let probability = if parsed.manipulation_probability.is_finite() {
        parsed.manipulation_probability.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut techniques = parsed.manipulation_techniques;
    if probability < PROMPT_THRESHOLD {
        techniques.clear();
    }
    debug!(probability, techniques = techniques.len(), "Parsed prompt classification");

    Ok(ClassificationOutput {
        probability,
        techniques,
        is_manipulation: None,
        score: None,
        threshold: PROMPT_THRESHOLD,
    })
}
