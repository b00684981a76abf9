use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::stages::ClassifierStrategy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub generation: GenerationConfig,
    pub scoring: ScoringConfig,
    pub search: SearchConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipeline: PipelineConfig,
}

/// Generation backend configuration.
///
/// `candidates` is an ordered preference list; it is resolved once at startup
/// into the first candidate whose requirements are satisfied.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub candidates: Vec<GenerationCandidate>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    /// Timeout for local OpenAI-compatible servers, which are much slower
    pub local_timeout_ms: u64,
}

/// One entry of the generation backend preference list
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCandidate {
    pub provider: GenerationProvider,
    pub model: String,
    pub base_url: Option<String>,
}

/// Supported generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    Gemini,
    Local,
}

/// Scoring (text classification) backend configuration
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Registry key of the model used when a run does not choose one
    pub default_model: String,
    /// Overrides the per-model default threshold for every run
    pub threshold: Option<f64>,
}

/// Web search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub denied_domains: Vec<String>,
}

/// Metrics sink configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub sink: MetricsSinkKind,
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub log_dir: PathBuf,
}

/// Where metrics events are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsSinkKind {
    Sqlite,
    Jsonl,
    Memory,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Pipeline defaults applied to every run unless overridden
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub classifier: ClassifierStrategy,
    pub search_cache_path: Option<PathBuf>,
    pub use_search_cache: bool,
}

const DEFAULT_GENERATION_BACKENDS: &str = "gemini:gemini-2.5-flash";
const DEFAULT_DENIED_DOMAINS: &str = "pinterest.com,reddit.com,quora.com";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let generation = GenerationConfig {
            candidates: parse_candidates(
                &env::var("GENERATION_BACKENDS")
                    .unwrap_or_else(|_| DEFAULT_GENERATION_BACKENDS.to_string()),
            )?,
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            local_timeout_ms: parse_var("LOCAL_LLM_TIMEOUT_MS").unwrap_or(300_000),
        };

        let scoring = ScoringConfig {
            base_url: env::var("SCORING_BASE_URL")
                .unwrap_or_else(|_| "https://api-inference.huggingface.co".to_string()),
            api_key: non_empty_var("HF_API_TOKEN"),
            default_model: env::var("SCORING_MODEL").unwrap_or_else(|_| "lapa-llm".to_string()),
            threshold: match env::var("SCORING_THRESHOLD") {
                Ok(raw) => Some(parse_threshold(&raw)?),
                Err(_) => None,
            },
        };

        let search = SearchConfig {
            api_key: non_empty_var("PERPLEXITY_API_KEY"),
            base_url: env::var("PERPLEXITY_BASE_URL")
                .unwrap_or_else(|_| "https://api.perplexity.ai".to_string()),
            model: env::var("PERPLEXITY_MODEL").unwrap_or_else(|_| "sonar".to_string()),
            denied_domains: env::var("SEARCH_DENIED_DOMAINS")
                .unwrap_or_else(|_| DEFAULT_DENIED_DOMAINS.to_string())
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
        };

        let metrics = MetricsConfig {
            sink: match env::var("METRICS_SINK")
                .unwrap_or_else(|_| "sqlite".to_string())
                .to_lowercase()
                .as_str()
            {
                "jsonl" => MetricsSinkKind::Jsonl,
                "memory" => MetricsSinkKind::Memory,
                _ => MetricsSinkKind::Sqlite,
            },
            database_path: PathBuf::from(
                env::var("METRICS_DATABASE_PATH").unwrap_or_else(|_| "./data/metrics.db".to_string()),
            ),
            max_connections: parse_var("METRICS_MAX_CONNECTIONS").unwrap_or(5),
            log_dir: PathBuf::from(env::var("METRICS_LOG_DIR").unwrap_or_else(|_| "logs".to_string())),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let pipeline = PipelineConfig {
            classifier: env::var("CLASSIFIER_STRATEGY")
                .unwrap_or_else(|_| "scoring".to_string())
                .parse()
                .map_err(|message| AppError::Config { message })?,
            search_cache_path: non_empty_var("SEARCH_CACHE_PATH").map(PathBuf::from),
            use_search_cache: env::var("USE_SEARCH_CACHE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        Ok(Config {
            generation,
            scoring,
            search,
            metrics,
            logging,
            request,
            pipeline,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn parse_threshold(raw: &str) -> Result<f64, AppError> {
    let value: f64 = raw.trim().parse().map_err(|_| AppError::Config {
        message: format!("SCORING_THRESHOLD must be a number, got '{}'", raw),
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Config {
            message: format!("SCORING_THRESHOLD must be within [0, 1], got {}", value),
        });
    }
    Ok(value)
}

/// Parse a comma-separated candidate list such as
/// `gemini:gemini-2.5-flash,local:mamaylm@http://127.0.0.1:1234`.
pub fn parse_candidates(raw: &str) -> Result<Vec<GenerationCandidate>, AppError> {
    let candidates: Vec<GenerationCandidate> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse())
        .collect::<Result<_, _>>()?;

    if candidates.is_empty() {
        return Err(AppError::Config {
            message: "GENERATION_BACKENDS must list at least one backend".to_string(),
        });
    }
    Ok(candidates)
}

impl std::str::FromStr for GenerationCandidate {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, rest) = s.split_once(':').ok_or_else(|| AppError::Config {
            message: format!("Invalid generation backend '{}': expected provider:model", s),
        })?;
        let provider: GenerationProvider = provider.parse()?;

        let (model, base_url) = match rest.split_once('@') {
            Some((model, url)) => (model.trim(), Some(url.trim().to_string())),
            None => (rest.trim(), None),
        };
        if model.is_empty() {
            return Err(AppError::Config {
                message: format!("Invalid generation backend '{}': model is empty", s),
            });
        }

        Ok(GenerationCandidate {
            provider,
            model: model.to_string(),
            base_url,
        })
    }
}

impl GenerationProvider {
    /// Get the provider name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationProvider::Gemini => "gemini",
            GenerationProvider::Local => "local",
        }
    }
}

impl std::fmt::Display for GenerationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GenerationProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(GenerationProvider::Gemini),
            "local" | "openai-compatible" => Ok(GenerationProvider::Local),
            other => Err(AppError::Config {
                message: format!(
                    "Unknown generation provider: {}. Must be 'gemini' or 'local'",
                    other
                ),
            }),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.perplexity.ai".to_string(),
            model: "sonar".to_string(),
            denied_domains: DEFAULT_DENIED_DOMAINS
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}
