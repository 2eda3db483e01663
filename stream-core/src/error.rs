//! Error types for STREAM core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Connection already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Encryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decryption failed (wrong secret, tampered or truncated data)
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Packet could not be interpreted
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
