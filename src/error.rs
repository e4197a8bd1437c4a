use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the PII filter service
#[derive(Error, Debug)]
pub enum PiiFilterError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Inbound payload is not well-formed or carries no usable `img_id`
    #[error("Malformed message: {0}")]
    Decode(String),

    /// Well-formed payload with missing or empty required fields
    #[error("Invalid fact for img_id {job_id:?}: {message}")]
    Validation { job_id: String, message: String },

    /// Payload carries neither `bounding_boxes` nor `pii_terms`
    #[error("Unknown message kind for img_id {job_id}")]
    UnknownKind { job_id: String },

    /// Key-value store could not be reached or did not answer in time
    #[error("Partial fact store unavailable: {0}")]
    StoreUnavailable(String),

    /// Completed result could not be sent downstream
    #[error("Result publication failed: {0}")]
    PublishUnavailable(String),

    /// Message broker could not be reached or did not answer in time
    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A stored fact record no longer deserializes
    #[error("Corrupt record at {key}: {source}")]
    CorruptRecord {
        key: String,
        source: serde_json::Error,
    },

    /// Text detection failed on the submitted image
    #[error("Text detection failed: {0}")]
    Detection(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PiiFilterError {
    /// True for transport outages that may heal on their own.
    ///
    /// Messages failing with a transient error are handed back to the queue
    /// for redelivery; every other failure is a permanent discard.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PiiFilterError::StoreUnavailable(_)
                | PiiFilterError::PublishUnavailable(_)
                | PiiFilterError::BrokerUnavailable(_)
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for PII filter operations
pub type Result<T> = std::result::Result<T, PiiFilterError>;
