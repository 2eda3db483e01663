//! Error types for the STREAM sender

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryError;

/// Result type for sender operations
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcome of a payment attempt.
///
/// Individual packet rejections never surface here; only accumulated
/// signals, violations and infeasible targets do.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentError {
    /// Probed rate cannot satisfy the minimum exchange rate
    #[error("Exchange rate is below the minimum acceptable rate")]
    InsufficientExchangeRate,

    /// Rate margin too thin for packets the path can carry
    #[error("Exchange rate rounding prevents enforcing the minimum rate")]
    ExchangeRateRoundingError,

    /// Fixed delivery with a non-positive minimum rate
    #[error("Delivery amount cannot be enforced without a positive minimum rate")]
    UnenforceableDelivery,

    /// Receiver announced a different asset than expected
    #[error("Destination asset details conflict")]
    DestinationAssetConflict,

    /// Receiver fulfilled less than the packet's minimum
    #[error("Receiver violated the STREAM protocol")]
    ReceiverProtocolViolation,

    /// Receiver cannot accept the amount to deliver
    #[error("Receiver's maximum is below the amount to deliver")]
    IncompatibleReceiveMax,

    /// Path cannot carry any money, or keeps failing with final errors
    #[error("Connector error: the path cannot deliver packets")]
    ConnectorError,

    /// No fulfillment within the idle timeout
    #[error("No money delivered within the idle timeout")]
    IdleTimeout,

    /// Sequence ceiling for the shared secret reached
    #[error("Exceeded the maximum safe sequence number")]
    ExceededMaxSequence,

    /// Receiver closed the connection or stream
    #[error("Connection closed by the recipient")]
    ClosedByRecipient,

    /// No authentic reply to any probe packet
    #[error("Rate probe failed: no authentic reply from the recipient")]
    RateProbeFailed,

    /// Rolling failure rate over the configured threshold
    #[error("Too many packets failed")]
    ExcessiveFailureRate,
}

/// Sender errors
#[derive(Error, Debug)]
pub enum Error {
    /// Core error (codec, crypto, connection)
    #[error("Core error: {0}")]
    Core(#[from] stream_core::Error),

    /// Payment ended in a terminal state
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Rate source failed
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Retry collaborator gave up
    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

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
