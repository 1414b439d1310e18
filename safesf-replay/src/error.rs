//! Error types for the SafeSF replay crate

use thiserror::Error;

/// Result type for session operations
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors that can occur while driving a session
///
/// Cache and storage faults are deliberately absent: the session cache
/// degrades them to a miss or a no-op instead of surfacing them here.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Live event source failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Live event source closed before it was used
    #[error("Connection closed")]
    ConnectionClosed,

    /// Another session is running on the same controller
    #[error("A session is already active on this controller")]
    SessionActive,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
