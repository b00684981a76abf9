use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{MetricsEvent, MetricsSink, Stage};
use crate::config::MetricsConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed metrics sink
#[derive(Clone)]
pub struct SqliteMetricsSink {
    pool: SqlitePool,
}

impl SqliteMetricsSink {
    /// Open (or create) the metrics database and run migrations
    pub async fn new(config: &MetricsConfig) -> StorageResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let sink = Self { pool };
        sink.run_migrations().await?;

        Ok(sink)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running metrics database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one event
    pub async fn insert(&self, event: &MetricsEvent) -> StorageResult<()> {
        let to_text = |v: &Option<serde_json::Value>| {
            v.as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default())
        };

        sqlx::query(
            r#"
            INSERT INTO metrics_events (id, stage, content_id, duration_ms, input, output, metrics, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(event.stage.as_str())
        .bind(&event.content_id)
        .bind(event.duration_ms)
        .bind(to_text(&event.input))
        .bind(to_text(&event.output))
        .bind(to_text(&event.metrics))
        .bind(event.success)
        .bind(&event.error)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All events recorded for a content item, oldest first
    pub async fn events_for_content(&self, content_id: &str) -> StorageResult<Vec<MetricsEvent>> {
        let rows: Vec<MetricsEventRow> = sqlx::query_as(
            r#"
            SELECT id, stage, content_id, duration_ms, input, output, metrics, success, error, created_at
            FROM metrics_events
            WHERE content_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MetricsEvent::try_from).collect()
    }
}

#[async_trait]
impl MetricsSink for SqliteMetricsSink {
    async fn record(&self, event: MetricsEvent) {
        if let Err(e) = self.insert(&event).await {
            warn!(
                stage = %event.stage,
                content_id = %event.content_id,
                error = %e,
                "Failed to persist metrics event"
            );
        }
    }
}

#[derive(sqlx::FromRow)]
struct MetricsEventRow {
    id: String,
    stage: String,
    content_id: String,
    duration_ms: i64,
    input: Option<String>,
    output: Option<String>,
    metrics: Option<String>,
    success: bool,
    error: Option<String>,
    created_at: String,
}

impl TryFrom<MetricsEventRow> for MetricsEvent {
    type Error = StorageError;

    fn try_from(row: MetricsEventRow) -> Result<Self, Self::Error> {
        use chrono::DateTime;

        let stage = Stage::from_str(&row.stage).map_err(|message| StorageError::Query { message })?;
        let parse = |s: Option<String>| s.and_then(|s| serde_json::from_str(&s).ok());

        Ok(Self {
            id: row.id,
            stage,
            content_id: row.content_id,
            duration_ms: row.duration_ms,
            input: parse(row.input),
            output: parse(row.output),
            metrics: parse(row.metrics),
            success: row.success,
            error: row.error,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        })
    }
}
