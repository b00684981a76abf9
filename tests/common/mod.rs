//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use verifai::backends::{
    Backends, GenerationBackend, LabelScore, ScoringBackend, ScoringKind, ScoringRegistry, Scores,
    SearchBackend, SearchResult,
};
use verifai::error::{BackendError, BackendResult};
use verifai::graph::Pipeline;
use verifai::metrics::{MemoryMetricsSink, MetricsSink};
use verifai::stages::{StageCore, StageDefaults};

/// Which prompt a generation call belongs to, recognised by its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Classifier,
    Narrative,
    Queries,
    Synthesis,
    Verifier,
}

impl PromptKind {
    pub fn of(prompt: &str) -> Self {
        if prompt.contains("Analyze the content below for manipulation") {
            PromptKind::Classifier
        } else if prompt.contains("Extract the main narrative") {
            PromptKind::Narrative
        } else if prompt.contains("Generate 2-3 specific web search queries") {
            PromptKind::Queries
        } else if prompt.contains("Compare the statements") {
            PromptKind::Synthesis
        } else {
            PromptKind::Verifier
        }
    }
}

/// Generation backend answering each prompt kind with a canned reply.
pub struct ScriptedGeneration {
    name: String,
    failing: Vec<PromptKind>,
    verdict: String,
    classifier: String,
    calls: Mutex<Vec<PromptKind>>,
}

impl ScriptedGeneration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing: Vec::new(),
            verdict: r#"{"manipulation": true, "techniques": ["fear_appeals"], "disinfo": ["Claim: refuted by sources"], "explanation": "Fear-based framing with a refuted claim."}"#.to_string(),
            classifier: r#"{"manipulation_probability": 0.8, "manipulation_techniques": ["fear_appeals", "made_up"]}"#.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, kinds: &[PromptKind]) -> Self {
        self.failing = kinds.to_vec();
        self
    }

    pub fn with_verdict(mut self, verdict: &str) -> Self {
        self.verdict = verdict.to_string();
        self
    }

    pub fn with_classifier_reply(mut self, reply: &str) -> Self {
        self.classifier = reply.to_string();
        self
    }

    pub fn calls(&self) -> Vec<PromptKind> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGeneration {
    async fn generate(&self, prompt: &str) -> BackendResult<String> {
        let kind = PromptKind::of(prompt);
        self.calls.lock().unwrap().push(kind);

        if self.failing.contains(&kind) {
            return Err(BackendError::Unavailable {
                backend: self.name.clone(),
                message: "connection refused".to_string(),
                retries: 0,
            });
        }

        Ok(match kind {
            PromptKind::Classifier => self.classifier.clone(),
            PromptKind::Narrative => "The text claims prices will triple.".to_string(),
            PromptKind::Queries => "prices triple 2025\n\n  energy tariffs forecast  \n".to_string(),
            PromptKind::Synthesis => "Official data does not support the claim.".to_string(),
            PromptKind::Verifier => self.verdict.clone(),
        })
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Scoring backend returning fixed scores and counting calls.
pub struct FixedScorer {
    scores: Option<Scores>,
    kind: ScoringKind,
    threshold: f64,
    pub calls: AtomicUsize,
}

impl FixedScorer {
    pub fn multi(labels: &[(&str, f64)]) -> Self {
        Self {
            scores: Some(Scores::Multi(
                labels
                    .iter()
                    .map(|(label, score)| LabelScore {
                        label: label.to_string(),
                        score: *score,
                    })
                    .collect(),
            )),
            kind: ScoringKind::MultiLabel,
            threshold: 0.15,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn binary(label: &str, score: f64) -> Self {
        Self {
            scores: Some(Scores::Single(LabelScore {
                label: label.to_string(),
                score,
            })),
            kind: ScoringKind::Binary,
            threshold: 0.5,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken(kind: ScoringKind) -> Self {
        Self {
            scores: None,
            kind,
            threshold: 0.5,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringBackend for FixedScorer {
    async fn score(&self, _content: &str) -> BackendResult<Scores> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scores.clone().ok_or_else(|| BackendError::Api {
            status: 503,
            message: "model loading".to_string(),
        })
    }

    fn kind(&self) -> ScoringKind {
        self.kind
    }

    fn default_threshold(&self) -> f64 {
        self.threshold
    }
}

/// Search backend returning one result per query and recording queries.
#[derive(Default)]
pub struct RecordingSearch {
    queries: Mutex<Vec<String>>,
}

impl RecordingSearch {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for RecordingSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Vec<SearchResult> {
        self.queries.lock().unwrap().push(query.to_string());
        vec![SearchResult {
            url: format!("https://news.example.org/{}", query.replace(' ', "-")),
            snippet: format!("Evidence for {}", query),
        }]
    }
}

/// Everything a pipeline test needs to inspect after a run.
pub struct Harness {
    pub generation: Arc<ScriptedGeneration>,
    pub scorer: Arc<FixedScorer>,
    pub search: Arc<RecordingSearch>,
    pub metrics: Arc<MemoryMetricsSink>,
}

impl Harness {
    pub fn new(generation: ScriptedGeneration, scorer: FixedScorer) -> Self {
        Self {
            generation: Arc::new(generation),
            scorer: Arc::new(scorer),
            search: Arc::new(RecordingSearch::default()),
            metrics: Arc::new(MemoryMetricsSink::new()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            generation: self.generation.clone(),
            scoring: ScoringRegistry::new().with_backend("test-model", self.scorer.clone()),
            default_scoring: "test-model".to_string(),
            search: self.search.clone(),
        }
    }

    pub fn sink(&self) -> Arc<dyn MetricsSink> {
        self.metrics.clone()
    }

    pub fn core(&self, defaults: StageDefaults) -> StageCore {
        StageCore::new(self.backends(), self.sink(), defaults)
    }

    pub fn pipeline(&self, defaults: StageDefaults) -> Pipeline {
        Pipeline::new(self.backends(), self.sink(), defaults).expect("valid graph")
    }
}
