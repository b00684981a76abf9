use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::elapsed_ms;
use super::fact_check::{gather_evidence, generate_queries};
use crate::backends::{GenerationBackend, SearchBackend, SearchResult};
use crate::error::{StorageError, StorageResult};
use crate::metrics::{MetricsEvent, MetricsSink, Stage};

/// Cached evidence for one content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSearch {
    #[serde(alias = "search_queries")]
    pub search_queries: Vec<String>,
    #[serde(alias = "search_results")]
    pub search_results: Vec<SearchResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WrappedCacheFile {
    cache: BTreeMap<String, CachedSearch>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cached_messages: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CacheFile {
    Wrapped(WrappedCacheFile),
    Bare(BTreeMap<String, CachedSearch>),
}

/// Search evidence keyed by content id, reused across runs so that
/// different generation backends see identical evidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCache {
    entries: BTreeMap<String, CachedSearch>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file, accepting both the wrapped and the bare layout.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file: CacheFile = serde_json::from_str(&raw).map_err(|e| StorageError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let entries = match file {
            CacheFile::Wrapped(wrapped) => wrapped.cache,
            CacheFile::Bare(entries) => entries,
        };
        info!(path = %path.display(), entries = entries.len(), "Search cache loaded");
        Ok(Self { entries })
    }

    /// Write the cache in the wrapped layout, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let io_error = |e: std::io::Error| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let file = WrappedCacheFile {
            cache: self.entries.clone(),
            timestamp: Some(Utc::now().to_rfc3339()),
            cached_messages: Some(self.entries.len()),
        };
        let encoded = serde_json::to_string_pretty(&file).map_err(|e| StorageError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, encoded).map_err(io_error)?;

        info!(path = %path.display(), entries = self.entries.len(), "Search cache saved");
        Ok(())
    }

    pub fn lookup(&self, content_id: &str) -> Option<&CachedSearch> {
        self.entries.get(content_id)
    }

    pub fn insert(&mut self, content_id: impl Into<String>, entry: CachedSearch) {
        self.entries.insert(content_id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One input item for the cache builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    #[serde(alias = "message_id")]
    pub id: String,
    pub content: String,
}

/// Runs query generation and search once per item and collects the evidence.
#[derive(Clone)]
pub struct SearchCacheBuilder {
    generation: Arc<dyn GenerationBackend>,
    search: Arc<dyn SearchBackend>,
    metrics: Arc<dyn MetricsSink>,
}

impl SearchCacheBuilder {
    pub fn new(
        generation: Arc<dyn GenerationBackend>,
        search: Arc<dyn SearchBackend>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            generation,
            search,
            metrics,
        }
    }

    /// Build a cache for the items.
    ///
    /// Items with empty content are skipped. A failing item is recorded as a
    /// `cache_search_error` event and stored with empty evidence.
    pub async fn build(&self, items: &[CacheItem]) -> SearchCache {
        let mut cache = SearchCache::new();

        for (index, item) in items.iter().enumerate() {
            let content = item.content.trim();
            if content.is_empty() {
                continue;
            }
            info!(
                content_id = %item.id,
                item = index + 1,
                total = items.len(),
                "Preparing cached search"
            );

            let start = Instant::now();
            match generate_queries(self.generation.as_ref(), content, None).await {
                Ok(queries) => {
                    let results = gather_evidence(self.search.as_ref(), &queries).await;
                    info!(
                        content_id = %item.id,
                        queries = queries.len(),
                        results = results.len(),
                        "Cached search prepared"
                    );
                    cache.insert(
                        item.id.clone(),
                        CachedSearch {
                            search_queries: queries,
                            search_results: results,
                        },
                    );
                }
                Err(e) => {
                    warn!(content_id = %item.id, error = %e, "Cached search failed");
                    self.metrics
                        .record(
                            MetricsEvent::new(Stage::CacheSearchError, item.id.clone())
                                .failure(e.to_string(), elapsed_ms(start)),
                        )
                        .await;
                    cache.insert(item.id.clone(), CachedSearch::default());
                }
            }
        }

        cache
    }
}
