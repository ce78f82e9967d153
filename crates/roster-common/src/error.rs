//! Error types for Roster

use thiserror::Error;

/// Result type alias for Roster operations
pub type Result<T> = std::result::Result<T, RosterError>;

/// Errors shared by every Roster crate
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("Unknown target collection: {0}")]
    UnknownTarget(String),

    #[error("Reference data error: {0}")]
    ReferenceData(String),
}
