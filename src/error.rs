//! Error types for RFQ intake.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration-related errors.
///
/// The only errors that are fatal to the pipeline, and only at construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Email intake errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} fetch failed: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}")]
    AuthFailed { name: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Attachment text extraction errors. Always recovered by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Extractor {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Extractor {provider} is not configured")]
    Unavailable { provider: String },

    #[error("All extractors failed for {}: {}", path.display(), failures.join("; "))]
    AllProvidersFailed {
        path: PathBuf,
        failures: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier/extractor oracle errors. Recovered per call.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Oracle returned unusable output: {0}")]
    Unusable(String),
}

/// Downstream sink errors. Logged per sink, never surfaced as pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink {sink} delivery failed: {reason}")]
    Delivery { sink: String, reason: String },

    #[error("Sink {sink} panicked")]
    Panicked { sink: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
