use thiserror::Error;
use uuid::Uuid;

use crate::session_management::SessionStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(String),
    #[error("Value out of range: {0}")]
    NotInRange(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Storage read failed: {0}")]
    ReadFailed(String),
    #[error("Storage write failed: {0}")]
    WriteFailed(String),
    #[error("Stored row could not be decoded: {0}")]
    Corrupt(String),
}

impl From<sea_orm::DbErr> for StorageError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => StorageError::ConnectionFailed(e.to_string()),
            sea_orm::DbErr::Exec(e) => StorageError::WriteFailed(e.to_string()),
            sea_orm::DbErr::Query(e) => StorageError::ReadFailed(e.to_string()),
            other => StorageError::ReadFailed(other.to_string()),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Transition from {from} to {to} is not allowed")]
    NotAllowed {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("Policy forbids reopening a {from} session")]
    ReopenForbidden { from: SessionStatus },
}

/// Error kinds surfaced by the session lifecycle core.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Session not found: {0}")]
    NotFound(Uuid),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Backend error: {0}")]
    Backend(#[from] StorageError),
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
}

impl From<TransitionError> for SessionError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotAllowed { .. } => SessionError::Validation(err.to_string()),
            TransitionError::ReopenForbidden { .. } => SessionError::Conflict(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Environment monitor is not running")]
    NotRunning,
    #[error("No pending prompt with id {0}")]
    PromptNotFound(Uuid),
    #[error("Unable to read the working location: {0}")]
    Location(#[from] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}
