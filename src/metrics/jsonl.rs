use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{MetricsEvent, MetricsSink};
use crate::error::{StorageError, StorageResult};

/// Daily JSON-lines metrics files (`metrics_YYYYMMDD.jsonl`) under a log directory.
///
/// Writes are serialized through a mutex so concurrent stages never interleave
/// partial lines.
#[derive(Debug)]
pub struct JsonlMetricsSink {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Serialize)]
struct JsonlLine<'a> {
    timestamp: DateTime<Utc>,
    step: &'static str,
    content_id: &'a str,
    duration_seconds: f64,
    input: &'a Option<serde_json::Value>,
    output: &'a Option<serde_json::Value>,
    metrics: serde_json::Value,
    error: &'a Option<String>,
    success: bool,
}

impl JsonlMetricsSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File that receives events recorded at `at`
    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.log_dir
            .join(format!("metrics_{}.jsonl", at.format("%Y%m%d")))
    }

    /// Append one event as a single JSON line
    pub async fn append(&self, event: &MetricsEvent) -> StorageResult<()> {
        let line = JsonlLine {
            timestamp: event.created_at,
            step: event.stage.as_str(),
            content_id: &event.content_id,
            duration_seconds: event.duration_ms as f64 / 1000.0,
            input: &event.input,
            output: &event.output,
            metrics: event
                .metrics
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            error: &event.error,
            success: event.success,
        };
        let mut encoded = serde_json::to_string(&line).map_err(|e| StorageError::Malformed {
            path: self.log_dir.display().to_string(),
            message: e.to_string(),
        })?;
        encoded.push('\n');

        let path = self.file_for(event.created_at);
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .map_err(|e| io_error(&self.log_dir, e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(encoded.as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn record(&self, event: MetricsEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(
                stage = %event.stage,
                content_id = %event.content_id,
                error = %e,
                "Failed to write metrics line"
            );
        }
    }
}
