//! Error types for sqlgraph.

use thiserror::Error;

/// The main error type for statement graph operations.
#[derive(Debug, Error)]
pub enum SqlGraphError {
    /// The graph would violate a structural rule (cardinality, cycle, NOT arity).
    #[error("Structure error: {0}")]
    Structure(String),

    /// A reference needed by the operation does not resolve.
    #[error("Reference not active: {what}")]
    NotActive { what: String },

    /// The statement cannot be rendered as SQL.
    #[error("Render error: {0}")]
    Render(String),

    /// A value rendered as the SQL DEFAULT keyword where DEFAULT is not allowed.
    #[error("Value is DEFAULT")]
    DefaultValue,

    /// SQL text or a statement tree could not be interpreted.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Malformed persisted tree.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not implemented for this combination of node kinds.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqlGraphError {
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }

    pub fn not_active(what: impl Into<String>) -> Self {
        Self::NotActive { what: what.into() }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Importer failures carry no text position.
    pub fn import(message: impl Into<String>) -> Self {
        Self::parse(0, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

impl From<serde_json::Error> for SqlGraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for SqlGraphError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_) | sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => {
                Self::Connection(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Result type alias for sqlgraph operations.
pub type Result<T> = std::result::Result<T, SqlGraphError>;
