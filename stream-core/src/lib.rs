//! STREAM Core
//!
//! Value types and cryptographic building blocks shared by the STREAM sender.
//!
//! # Architecture
//!
//! - **Packets**: ILP Prepare/Fulfill/Reject envelopes carrying an encrypted
//!   STREAM packet (sequence, amount, ordered frames)
//! - **Authentication**: every money packet commits to a condition derived
//!   from the connection secret and the encrypted payload
//! - **Connection**: one shared secret, one atomic sequence counter, a
//!   forward-only state machine
//! - **Ratio**: exact rational arithmetic for exchange-rate bounds
//!
//! # Invariants
//!
//! - Same (secret, ciphertext) → same fulfillment and condition
//! - Sequence numbers are never handed out twice on one connection
//! - Connection state only moves forward: Available → Open → Closed

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod packet;
pub mod ratio;
pub mod types;

// Re-exports
pub use codec::{BincodeCodec, StreamCodec};
pub use connection::{ConnectionState, StreamConnection, MAX_SAFE_SEQUENCE};
pub use crypto::{AesGcmEncryptor, SharedSecret, StreamEncryptor, UNFULFILLABLE_CONDITION};
pub use error::{Error, Result};
pub use packet::{CloseCode, Frame, IlpPacketType, StreamPacket};
pub use ratio::Ratio;
pub use types::{
    AmountTooLargeData, Denomination, ErrorCode, ErrorFamily, IlpAddress, IlpFulfill, IlpPrepare,
    IlpReject, IlpReply,
};
