use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{elapsed_ms, serialize_for_log, AnalysisState, FactCheckOutput, SearchCache, StageCore};
use crate::backends::{GenerationBackend, SearchBackend, SearchResult};
use crate::error::BackendResult;
use crate::metrics::{MetricsEvent, Stage};
use crate::prompts::{fact_check_synthesis_prompt, query_generation_prompt};

/// Summary returned when there is nothing to check.
pub const NO_CONTENT_FOR_FACT_CHECK: &str = "No content available for fact-checking";

/// Prefix of the summary returned when any step fails.
pub const FACT_CHECK_FAILED_PREFIX: &str = "Fact-check failed due to an error:";

/// Queries sent to search per item.
pub(crate) const MAX_QUERIES: usize = 3;

/// Results requested per query.
pub(crate) const RESULTS_PER_QUERY: usize = 3;

/// Ask the generation backend for line-delimited search queries.
pub(crate) async fn generate_queries(
    generation: &dyn GenerationBackend,
    content: &str,
    narrative: Option<&str>,
) -> BackendResult<Vec<String>> {
    let completion = generation
        .generate(&query_generation_prompt(content, narrative))
        .await?;
    Ok(parse_queries(&completion))
}

fn parse_queries(completion: &str) -> Vec<String> {
    completion
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Search the first [`MAX_QUERIES`] queries in order and concatenate their results.
pub(crate) async fn gather_evidence(
    search: &dyn SearchBackend,
    queries: &[String],
) -> Vec<SearchResult> {
    let mut results = Vec::new();
    for query in queries.iter().take(MAX_QUERIES) {
        let hits = search.search(query, RESULTS_PER_QUERY).await;
        debug!(query = %query, hits = hits.len(), "Search completed");
        results.extend(hits);
    }
    results
}

/// Query generation, evidence gathering and synthesis.
#[derive(Clone)]
pub struct FactCheckStage {
    core: StageCore,
}

struct Evidence {
    queries: Vec<String>,
    results: Vec<SearchResult>,
    cache_hit: bool,
}

impl FactCheckStage {
    pub fn new(core: StageCore) -> Self {
        Self { core }
    }

    fn cache_for(&self, state: &AnalysisState) -> Option<Arc<SearchCache>> {
        let enabled = state
            .overrides
            .use_search_cache
            .unwrap_or(self.core.defaults().use_search_cache);
        if !enabled {
            return None;
        }
        state
            .overrides
            .search_cache
            .clone()
            .or_else(|| self.core.defaults().search_cache.clone())
    }

    /// Fact-check the content. Never fails.
    pub async fn run(&self, state: &AnalysisState, narrative: Option<&str>) -> FactCheckOutput {
        let start = Instant::now();
        let content_id = state.content_id();
        let input = json!({
            "content_length": state.content.chars().count(),
            "has_narrative": narrative.is_some_and(|n| !n.trim().is_empty()),
        });

        if !state.has_content() {
            let output = FactCheckOutput {
                summary: NO_CONTENT_FOR_FACT_CHECK.to_string(),
                ..Default::default()
            };
            self.record(content_id, input, &output, false, None, start).await;
            return output;
        }

        let generation = self.core.generation(state);

        match self.check(state, generation.as_ref(), narrative).await {
            Ok((output, cache_hit)) => {
                info!(
                    content_id = %content_id,
                    queries = output.search_queries.len(),
                    results = output.search_results.len(),
                    cache_hit,
                    "Fact-check completed"
                );
                self.record(content_id, input, &output, cache_hit, None, start)
                    .await;
                output
            }
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    stage = %Stage::FactChecker,
                    error = %e,
                    "Fact-check failed"
                );
                let output = FactCheckOutput {
                    summary: format!("{} {}", FACT_CHECK_FAILED_PREFIX, e),
                    ..Default::default()
                };
                self.record(content_id, input, &output, false, Some(e.to_string()), start)
                    .await;
                output
            }
        }
    }

    async fn check(
        &self,
        state: &AnalysisState,
        generation: &dyn GenerationBackend,
        narrative: Option<&str>,
    ) -> BackendResult<(FactCheckOutput, bool)> {
        let evidence = self.evidence(state, generation, narrative).await?;
        let summary = generation
            .generate(&fact_check_synthesis_prompt(
                &state.content,
                &evidence.queries,
                &evidence.results,
            ))
            .await?;

        Ok((
            FactCheckOutput {
                search_queries: evidence.queries,
                search_results: evidence.results,
                summary,
            },
            evidence.cache_hit,
        ))
    }

    async fn evidence(
        &self,
        state: &AnalysisState,
        generation: &dyn GenerationBackend,
        narrative: Option<&str>,
    ) -> BackendResult<Evidence> {
        if let Some(cache) = self.cache_for(state) {
            if let Some(cached) = cache.lookup(state.content_id()) {
                debug!(content_id = %state.content_id(), "Using cached search results");
                return Ok(Evidence {
                    queries: cached.search_queries.clone(),
                    results: cached.search_results.clone(),
                    cache_hit: true,
                });
            }
            debug!(content_id = %state.content_id(), "Search cache miss, searching live");
        }

        let queries = generate_queries(generation, &state.content, narrative).await?;
        let results = gather_evidence(self.core.backends().search.as_ref(), &queries).await;
        Ok(Evidence {
            queries,
            results,
            cache_hit: false,
        })
    }

    async fn record(
        &self,
        content_id: &str,
        input: serde_json::Value,
        output: &FactCheckOutput,
        cache_hit: bool,
        error: Option<String>,
        start: Instant,
    ) {
        let event = MetricsEvent::new(Stage::FactChecker, content_id)
            .with_input(input)
            .with_metrics(json!({
                "queries_count": output.search_queries.len(),
                "results_count": output.search_results.len(),
                "summary_length": output.summary.chars().count(),
                "cache_hit": cache_hit,
            }));
        let duration = elapsed_ms(start);
        let event = match error {
            Some(e) => event.failure(e, duration),
            None => event.success(serialize_for_log(output, "fact-check output"), duration),
        };
        self.core.metrics().record(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queries_trims_and_drops_blanks() {
        let queries = parse_queries("  інфляція 2024  \n\n\tціни на газ\n   \n");
        assert_eq!(queries, vec!["інфляція 2024", "ціни на газ"]);
    }
}
