//! Error types for the query engine

use crate::core::Status;
use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open query: {0}")]
    SessionOpen(Status),

    #[error("Failed to close query: {0}")]
    SessionClose(Status),

    #[error("Query is already open")]
    AlreadyOpen,

    #[error("Query is not open")]
    NotOpen,

    #[error("Failed to add counter '{path}': {status}")]
    Registration { path: String, status: Status },

    #[error("Failed to collect query data: {0}")]
    Collection(Status),

    #[error("Counter '{path}' has not been collected yet")]
    NotCollected { path: String },

    #[error("Counter handle for '{path}' is not registered on this query")]
    StaleHandle { path: String },

    #[error("Failed to read counter '{path}': {status}")]
    Read { path: String, status: Status },

    #[error("Failed to read counter '{path}' for instance '{instance}': {status}")]
    InstanceRead {
        path: String,
        instance: String,
        status: Status,
    },

    #[error("Value not found for instance '{instance}' of counter '{path}'")]
    InstanceNotFound { path: String, instance: String },

    #[error("No query in progress for counter '{0}'")]
    UnregisteredPath(String),

    #[error("Counter '{0}' is already being watched")]
    AlreadyWatching(String),

    #[error("Background collection needs a Tokio runtime: {0}")]
    NoRuntime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Hardware not supported: {0}")]
    HardwareNotSupported(String),
}

impl Error {
    /// The subsystem status behind this error, if any
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::SessionOpen(status)
            | Error::SessionClose(status)
            | Error::Collection(status) => Some(*status),
            Error::Registration { status, .. }
            | Error::Read { status, .. }
            | Error::InstanceRead { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
