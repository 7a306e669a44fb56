//! Error types for connector ports.

use thiserror::Error;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised by the bus, KV, and document collaborators
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Key missing where the operation requires it (e.g. RENAME source)
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Operation applied to a key holding another value kind
    #[error("Wrong value kind at key {0}")]
    WrongKind(String),

    /// Bus publish or subscribe failure
    #[error("Bus error: {0}")]
    Bus(String),

    /// Document store failure
    #[error("Document store error: {0}")]
    Storage(String),

    /// Payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}
