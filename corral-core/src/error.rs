//! Error types for corral operations

/// Result type for corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

/// Error types for the corral core
#[derive(Debug, thiserror::Error)]
pub enum CorralError {
    /// Worker lookup failed
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// Tool server lookup failed
    #[error("Tool server not found: {0}")]
    ServerNotFound(String),

    /// Store read or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Secret could not be encrypted or decrypted
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Manifest (YAML) error
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for CorralError {
    fn from(s: String) -> Self {
        CorralError::Other(s)
    }
}

impl From<&str> for CorralError {
    fn from(s: &str) -> Self {
        CorralError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for CorralError {
    fn from(err: anyhow::Error) -> Self {
        CorralError::Other(err.to_string())
    }
}
