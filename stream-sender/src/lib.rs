//! STREAM Sender
//!
//! Executes Interledger STREAM payments: splits a payment into many small
//! ILP packets, discovers the path's exchange rate and packet limit as it
//! goes, and stops once the target is met or the payment cannot succeed.
//!
//! # Architecture
//!
//! - **Trackers**: per-payment state (rate bounds, max packet, pacing,
//!   congestion window, amounts, statistics, asset details)
//! - **Filter chain**: ordered filters vote on every packet and learn from
//!   every reply
//! - **Send loop**: `StreamPayer` probes, fixes the target, then keeps
//!   packets in flight until the chain says stop
//! - **Link**: one async round trip per packet; wrap with `RetryingLink`
//!   to retry temporary rejects
//!
//! # Invariants
//!
//! - Every fulfilled packet delivered at least the minimum exchange rate
//! - Fixed-send payments never send more than the target
//! - In-flight packets are always drained before the receipt is produced
//! - No sequence past the safe ceiling is ever used for money

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod filters;
pub mod link;
pub mod metrics;
pub mod oracle;
pub mod payer;
pub mod probe;
pub mod retry;
pub mod simulator;
pub mod trackers;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, PaymentError, Result};
pub use link::Link;
pub use metrics::PaymentMetrics;
pub use oracle::{ExchangeRateOracle, StaticRateOracle};
pub use payer::StreamPayer;
pub use retry::{RetryError, RetryPolicy, RetryingLink};
pub use simulator::SimulatedReceiver;
pub use types::{PaymentEstimate, PaymentOutcome, PaymentRequest, PaymentType, Receipt};
