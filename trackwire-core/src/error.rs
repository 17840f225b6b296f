//! Error types for trackwire-core

use thiserror::Error;

/// Main error type for the trackwire-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A producer handed over something that cannot become an envelope
    #[error("format error: {0}")]
    Format(String),

    /// Delivery to the collection endpoint failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable store error
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for trackwire-core
pub type Result<T> = std::result::Result<T, Error>;
