use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use super::{ClassifierStrategy, SearchCache};
use crate::backends::{GenerationBackend, SearchResult};

/// Fixed vocabulary of manipulation techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    EmotionalManipulation,
    FearAppeals,
    BandwagonEffect,
    SelectiveTruth,
    Cliche,
}

impl Technique {
    /// Every technique, in vocabulary order.
    pub const ALL: [Technique; 5] = [
        Technique::EmotionalManipulation,
        Technique::FearAppeals,
        Technique::BandwagonEffect,
        Technique::SelectiveTruth,
        Technique::Cliche,
    ];

    /// Wire name of the technique
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::EmotionalManipulation => "emotional_manipulation",
            Technique::FearAppeals => "fear_appeals",
            Technique::BandwagonEffect => "bandwagon_effect",
            Technique::SelectiveTruth => "selective_truth",
            Technique::Cliche => "cliche",
        }
    }

    /// Short description used in prompts
    pub fn description(&self) -> &'static str {
        match self {
            Technique::EmotionalManipulation => {
                "expressive language with strong emotional colouring or a euphoric tone used to sway opinion"
            }
            Technique::FearAppeals => {
                "plays on fears, stereotypes or prejudice; fear, uncertainty and doubt tactics"
            }
            Technique::BandwagonEffect => {
                "appeals to the masses (\"everyone thinks so\") or vague positive concepts to win agreement"
            }
            Technique::SelectiveTruth => {
                "cherry-picked facts, whataboutism or straw-man arguments"
            }
            Technique::Cliche => {
                "thought-terminating formulaic phrases meant to shut down critical thinking"
            }
        }
    }

    /// Map a classifier label to a technique.
    ///
    /// Accepts the positional labels `LABEL_0`..`LABEL_4` (vocabulary order)
    /// and vocabulary names verbatim.
    pub fn from_label(label: &str) -> Option<Self> {
        if let Some(index) = label.strip_prefix("LABEL_") {
            return index
                .parse::<usize>()
                .ok()
                .and_then(|i| Self::ALL.get(i).copied());
        }
        label.parse().ok()
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown technique: {}", s))
    }
}

/// Insertion-ordered set of techniques.
///
/// Deserializes from a list of names, silently dropping duplicates and
/// anything outside the vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TechniqueSet(Vec<Technique>);

impl TechniqueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary names, keeping only known techniques.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| name.as_ref().trim().parse().ok())
            .collect()
    }

    /// Insert a technique. Returns false if it was already present.
    pub fn insert(&mut self, technique: Technique) -> bool {
        if self.0.contains(&technique) {
            return false;
        }
        self.0.push(technique);
        true
    }

    pub fn contains(&self, technique: Technique) -> bool {
        self.0.contains(&technique)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Technique> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Technique] {
        &self.0
    }
}

impl FromIterator<Technique> for TechniqueSet {
    fn from_iter<I: IntoIterator<Item = Technique>>(iter: I) -> Self {
        let mut set = TechniqueSet::new();
        for technique in iter {
            set.insert(technique);
        }
        set
    }
}

impl<'de> Deserialize<'de> for TechniqueSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
        Ok(TechniqueSet::from_names(
            values.iter().filter_map(serde_json::Value::as_str),
        ))
    }
}

/// Final verdict for a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub manipulation: bool,
    pub techniques: TechniqueSet,
    /// Flagged claims, formatted as `claim: explanation`.
    pub disinfo: Vec<String>,
    pub explanation: String,
}

/// Output of the classification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutput {
    /// Manipulation probability in [0, 1].
    pub probability: f64,
    pub techniques: TechniqueSet,
    /// Threshold decision (scoring strategy only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_manipulation: Option<bool>,
    /// Raw model score (scoring strategy only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Decision threshold applied in this run.
    pub threshold: f64,
}

impl ClassificationOutput {
    /// Safe-empty output for the scoring strategy
    pub fn empty_scored(threshold: f64) -> Self {
        Self {
            probability: 0.0,
            techniques: TechniqueSet::new(),
            is_manipulation: Some(false),
            score: Some(0.0),
            threshold,
        }
    }

    /// Safe-empty output for the prompt strategy
    pub fn empty_prompted(threshold: f64) -> Self {
        Self {
            probability: 0.0,
            techniques: TechniqueSet::new(),
            is_manipulation: None,
            score: None,
            threshold,
        }
    }

    /// Whether upstream crossed the decision threshold
    pub fn crossed_threshold(&self) -> bool {
        self.is_manipulation
            .unwrap_or(self.probability >= self.threshold)
    }
}

/// Output of the fact-check stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheckOutput {
    pub search_queries: Vec<String>,
    pub search_results: Vec<SearchResult>,
    pub summary: String,
}

/// Per-run configuration carried alongside the state. Never persisted.
#[derive(Clone, Default)]
pub struct RunOverrides {
    /// Replaces the process-wide generation backend for this run.
    pub generation: Option<Arc<dyn GenerationBackend>>,
    pub classifier: Option<ClassifierStrategy>,
    /// Scoring registry key.
    pub scoring_model: Option<String>,
    pub threshold: Option<f64>,
    pub use_search_cache: Option<bool>,
    pub search_cache: Option<Arc<SearchCache>>,
}

impl std::fmt::Debug for RunOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOverrides")
            .field("generation", &self.generation.as_ref().map(|g| g.name()))
            .field("classifier", &self.classifier)
            .field("scoring_model", &self.scoring_model)
            .field("threshold", &self.threshold)
            .field("use_search_cache", &self.use_search_cache)
            .field("search_cache", &self.search_cache.as_ref().map(|c| c.len()))
            .finish()
    }
}

/// Accumulating state for one content item.
///
/// Each stage slot is written by exactly one graph node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisState {
    pub content: String,
    pub content_id: Option<String>,
    pub classification: Option<ClassificationOutput>,
    pub narrative: Option<String>,
    pub fact_check: Option<FactCheckOutput>,
    pub verdict: Option<Verdict>,
    #[serde(skip)]
    pub overrides: RunOverrides,
}

impl AnalysisState {
    /// Create a state holding only the content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the content identifier
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Set per-run overrides
    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Content identifier, or `unknown` before the executor assigned one
    pub fn content_id(&self) -> &str {
        self.content_id.as_deref().unwrap_or("unknown")
    }

    /// Whether the content is empty after trimming
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}
