//! # VerifAI
//!
//! Analyzes a piece of text for manipulative rhetoric and factual inaccuracy
//! and produces a structured verdict: manipulation flag, named techniques,
//! flagged disinformation claims and a human-readable explanation.
//!
//! ## Architecture
//!
//! ```text
//!            ┌─► classification ─► narrative ─┐
//! content ───┤                                ├─► verification ─► Verdict
//!            └─► fact-check ──────────────────┘
//! ```
//!
//! Every stage tolerates backend failure and degrades to a documented
//! fallback; only an executor fault makes a run fail. Blank content yields
//! the no-content verdict.
//! Backends (generation, scoring, search) are built once per process and
//! shared through [`backends::Backends`].
//!
//! ## Example
//!
//! ```ignore
//! use verifai::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let pipeline = Pipeline::from_config(&config).await?;
//!     let verdict = pipeline.analyze("Всі знають, що це небезпечно!", None).await?;
//!     println!("{}", serde_json::to_string_pretty(&verdict)?);
//!     Ok(())
//! }
//! ```

/// Generation, scoring and search backend contracts and HTTP adapters.
pub mod backends;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Task graph executor and the analysis pipeline.
pub mod graph;
/// Structured per-stage metrics and their sinks.
pub mod metrics;
/// Prompt builders for the generation backend.
pub mod prompts;
/// Analysis stages and the state they share.
pub mod stages;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use graph::Pipeline;
pub use stages::{AnalysisState, Technique, TechniqueSet, Verdict};
