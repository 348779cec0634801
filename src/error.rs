use thiserror::Error;

/// Convenience type alias for Results with FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for Fleet Core
///
/// Variants mirror the coordination substrate's error taxonomy so that
/// transports can map them onto their native status codes without
/// inspecting message text.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Dependency failed: {component} - {message}")]
    DependencyFailed { component: String, message: String },

    #[error("No approver with sufficient authority for {0}")]
    NoApprover(String),

    #[error("Cannot escalate request {0}: no higher approver")]
    CannotEscalate(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
