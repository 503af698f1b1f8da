//! Error types for supervisor operations

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Worker {0} is already running")]
    AlreadyRunning(String),

    #[error("Worker {0} is already starting")]
    AlreadyStarting(String),

    #[error("Worker {0} has no assigned port")]
    NoPortAssigned(String),

    #[error("Port {0} is still in use")]
    PortInUse(u16),

    #[error("Worker on port {port} did not become healthy after {attempts} attempts")]
    HealthCheckTimeout { port: u16, attempts: u32 },

    #[error("Invalid worker id {0:?}: must be a single path segment")]
    InvalidWorkerId(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error(transparent)]
    Store(#[from] corral_core::CorralError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
