use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Metrics persistence and cache file errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed data in {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by generation, scoring and search adapters
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} unavailable: {message} (retries: {retries})")]
    Unavailable {
        backend: String,
        message: String,
        retries: u32,
    },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Missing credentials for {backend}: set {env_var}")]
    MissingCredentials { backend: String, env_var: String },

    #[error("Unknown backend '{key}'. Available: {available}")]
    UnknownBackend { key: String, available: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Task graph construction and execution errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid task graph: {message}")]
    InvalidGraph { message: String },

    #[error("State field '{field}' written twice (by {node})")]
    MergeConflict { field: String, node: String },

    #[error("Node '{node}' aborted: {message}")]
    NodeAborted { node: String, message: String },

    #[error("Terminal node produced no verdict")]
    MissingVerdict,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for graph execution
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::Io {
            path: "cache.json".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "I/O error on cache.json: not found");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Unavailable {
            backend: "gemini".to_string(),
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "gemini unavailable: server down (retries: 3)");

        let err = BackendError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = BackendError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = BackendError::MissingCredentials {
            backend: "perplexity".to_string(),
            env_var: "PERPLEXITY_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing credentials for perplexity: set PERPLEXITY_API_KEY"
        );

        let err = BackendError::UnknownBackend {
            key: "bert".to_string(),
            available: "lapa-llm, modern-bert".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown backend 'bert'. Available: lapa-llm, modern-bert"
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        assert_eq!(
            PipelineError::MissingVerdict.to_string(),
            "Terminal node produced no verdict"
        );

        let err = PipelineError::MergeConflict {
            field: "narrative".to_string(),
            node: "narrative_extractor".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "State field 'narrative' written twice (by narrative_extractor)"
        );
    }

    #[test]
    fn test_backend_error_conversion_to_app_error() {
        let err: AppError = BackendError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn test_pipeline_error_conversion_to_app_error() {
        let err: AppError = PipelineError::MissingVerdict.into();
        assert!(matches!(err, AppError::Pipeline(_)));
        assert!(err.to_string().contains("no verdict"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let err: AppError = StorageError::Query {
            message: "syntax".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
