//! Shared state trackers
//!
//! Each tracker owns its fields behind a mutex or atomics and exposes a
//! narrow API. Replies arrive in any order, so every mutation is safe to
//! apply out of order: subtraction clamps, bounds only narrow, and state
//! flags only move one way.

pub mod amount;
pub mod asset_details;
pub mod congestion;
pub mod exchange_rate;
pub mod max_packet;
pub mod pacing;
pub mod shared_state;
pub mod statistics;

// Re-exports
pub use amount::{check_feasibility, AmountSnapshot, AmountTracker, PaymentTargetConditions};
pub use asset_details::AssetDetailsTracker;
pub use congestion::{CongestionController, CongestionPhase};
pub use exchange_rate::ExchangeRateTracker;
pub use max_packet::{MaxPacketAmountTracker, MaxPacketState};
pub use pacing::PacingTracker;
pub use shared_state::PaymentSharedStateTracker;
pub use statistics::StatisticsTracker;
