//! Error types for document models

use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not found: {name}")]
    NotFound { name: String },

    #[error("Model already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Document not found: {model}/{id}")]
    DocumentNotFound { model: String, id: String },

    #[error("Invalid schema for model {model}: {reason}")]
    InvalidSchema { model: String, reason: String },

    #[error("Unknown field `{field}` on model {model}")]
    UnknownField { model: String, field: String },

    #[error("Field `{field}` on model {model} is immutable once persisted")]
    ImmutableField { model: String, field: String },

    #[error("Field `{field}` on model {model} is not a reference")]
    NotAReference { model: String, field: String },

    #[error("Cannot populate `{field}` on model {model}: {reason}")]
    InvalidPopulate { model: String, field: String, reason: String },

    #[error("Version snapshot failed for {model}/{id}: {reason}")]
    Snapshot { model: String, id: String, reason: String },

    #[error("Transform failed for model {model}: {reason}")]
    Transform { model: String, reason: String },

    #[error("Query on model {model} failed: {reason}")]
    Query { model: String, reason: String },

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Link query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl ModelError {
    /// Whether this error is a model lookup failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound { .. })
    }
}
