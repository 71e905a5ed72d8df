//! Error types for the schema registry

use std::path::PathBuf;

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema registry errors
///
/// Every variant carries the data a caller needs to branch on it; use
/// [`SchemaError::kind`] when only the category matters.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Invalid parameters: {}", .params.join(", "))]
    InvalidParams { params: Vec<String> },

    #[error("Schema already exists: {name}{}", .filepath.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    SchemaExists {
        name: String,
        filepath: Option<PathBuf>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Failed to load schema from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error("Keyword '{keyword}' could not be registered: {reason}")]
    KeywordRegistration { keyword: String, reason: String },

    #[error("Circular extension: {}", .chain.join(" -> "))]
    CircularExtension { chain: Vec<String> },

    #[error("Failed to compile schema {name}: {reason}")]
    Compile { name: String, reason: String },

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    /// Shorthand for a missing schema
    pub fn schema_not_found(id: impl Into<String>) -> Self {
        SchemaError::NotFound {
            kind: "schema".to_string(),
            id: id.into(),
        }
    }

    /// Shorthand for a single bad parameter
    pub fn invalid_param(param: impl Into<String>) -> Self {
        SchemaError::InvalidParams {
            params: vec![param.into()],
        }
    }

    /// Stable label for the error category
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaError::InvalidParams { .. } => "InvalidParams",
            SchemaError::SchemaExists { .. } => "SchemaExists",
            SchemaError::NotFound { .. } => "NotFound",
            SchemaError::Load { .. } | SchemaError::Io(_) | SchemaError::Json(_) => "LoadError",
            SchemaError::KeywordRegistration { .. } => "KeywordRegistrationFailure",
            SchemaError::CircularExtension { .. } => "CircularExtension",
            SchemaError::Compile { .. } => "CompileError",
            SchemaError::ValidationFailed { .. } => "ValidationFailed",
            SchemaError::Config(_) => "ConfigError",
        }
    }
}
