use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use verifai::{
    backends::{build_backends, GenerationBackend},
    config::{Config, LogFormat},
    metrics::build_metrics_sink,
    stages::{
        AnalysisState, CacheItem, ClassifierStrategy, RunOverrides, SearchCache,
        SearchCacheBuilder,
    },
    Pipeline,
};

#[derive(Parser)]
#[command(name = "verifai", version, about = "Manipulation and disinformation analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one text and print the verdict as JSON
    Analyze {
        /// Identifier used in metrics and cache lookups (random UUID if omitted)
        #[arg(long)]
        content_id: Option<String>,
        /// Classification strategy: scoring or prompt
        #[arg(long)]
        classifier: Option<ClassifierStrategy>,
        /// Scoring model key (lapa-llm, modern-bert)
        #[arg(long)]
        scoring_model: Option<String>,
        /// Decision threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,
        /// Search cache file; enables cached evidence for this run
        #[arg(long)]
        search_cache: Option<PathBuf>,
        /// Text to analyze, or `-` to read stdin
        text: String,
    },
    /// Run query generation and search once per item and write a search cache
    PrepareCache {
        /// JSON array of {"id", "content"} objects
        #[arg(long)]
        input: PathBuf,
        /// Cache file to write
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "VerifAI starting...");

    let result = match cli.command {
        Command::Analyze {
            content_id,
            classifier,
            scoring_model,
            threshold,
            search_cache,
            text,
        } => {
            let overrides = RunOverrides {
                classifier,
                scoring_model,
                threshold,
                use_search_cache: search_cache.as_ref().map(|_| true),
                search_cache: match search_cache {
                    Some(path) => Some(Arc::new(SearchCache::load(&path)?)),
                    None => None,
                },
                ..Default::default()
            };
            analyze(&config, read_text(&text)?, content_id, overrides).await
        }
        Command::PrepareCache { input, output } => prepare_cache(&config, &input, &output).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

async fn analyze(
    config: &Config,
    content: String,
    content_id: Option<String>,
    overrides: RunOverrides,
) -> anyhow::Result<()> {
    if let Some(threshold) = overrides.threshold {
        anyhow::ensure!(
            (0.0..=1.0).contains(&threshold),
            "--threshold must be within [0, 1], got {}",
            threshold
        );
    }

    let pipeline = Pipeline::from_config(config).await?;

    let mut state = AnalysisState::new(content).with_overrides(overrides);
    state.content_id = content_id;

    let state = pipeline.run(state).await?;
    let verdict = state
        .verdict
        .context("Pipeline finished without a verdict")?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn prepare_cache(config: &Config, input: &Path, output: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let items: Vec<CacheItem> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must be a JSON array of {{id, content}}", input.display()))?;

    let backends = build_backends(config)?;
    let metrics = build_metrics_sink(&config.metrics).await?;
    let generation: Arc<dyn GenerationBackend> = backends.generation.clone();
    info!(
        items = items.len(),
        generation = %generation.name(),
        "Preparing search cache"
    );

    let cache = SearchCacheBuilder::new(generation, backends.search.clone(), metrics)
        .build(&items)
        .await;
    cache.save(output)?;

    info!(entries = cache.len(), path = %output.display(), "Search cache written");
    Ok(())
}

fn read_text(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read stdin")?;
    Ok(buffer)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
