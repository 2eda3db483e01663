//! Max packet amount discovery
//!
//! Hops reject packets that are too large with F08. When the reject carries
//! metadata the exact limit is known; otherwise the tracker binary searches
//! between the largest amount known to get through and the last failure.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stream_core::{AmountTooLargeData, ErrorCode, IlpReject, Ratio};

/// What is known about the path's packet limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxPacketState {
    /// No F08 seen yet
    UnknownMax,
    /// Limit is below this value, but by how much is unknown
    ImpreciseMax(u64),
    /// Limit reported exactly by a hop
    PreciseMax(u64),
}

impl MaxPacketState {
    /// Upper bound on the packet amount (`u64::MAX` when unknown)
    pub fn value(&self) -> u64 {
        match self {
            MaxPacketState::UnknownMax => u64::MAX,
            MaxPacketState::ImpreciseMax(value) | MaxPacketState::PreciseMax(value) => *value,
        }
    }
}

#[derive(Debug)]
struct MaxPacketInner {
    state: MaxPacketState,
    verified_path_capacity: u64,
    no_capacity_available: bool,
}

/// Tracks the largest packet the path can carry
#[derive(Debug)]
pub struct MaxPacketAmountTracker {
    inner: Mutex<MaxPacketInner>,
}

impl Default for MaxPacketAmountTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MaxPacketAmountTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MaxPacketInner {
                state: MaxPacketState::UnknownMax,
                verified_path_capacity: 0,
                no_capacity_available: false,
            }),
        }
    }

    /// Learn from an F08 reject of a packet of `attempted_source_amount`
    pub fn reduce_max_packet_amount(&self, reject: &IlpReject, attempted_source_amount: u64) {
        if reject.code != ErrorCode::F08_AMOUNT_TOO_LARGE {
            return;
        }

        let candidate = match AmountTooLargeData::from_bytes(&reject.data) {
            Some(metadata) if metadata.received_amount > metadata.maximum_amount => {
                // Convert the hop's maximum back into source units
                let max = Ratio::from_amounts(metadata.maximum_amount, metadata.received_amount)
                    .map(|ratio| ratio.multiply_floor(attempted_source_amount))
                    .unwrap_or(0);
                MaxPacketState::PreciseMax(max)
            }
            Some(metadata) => {
                tracing::warn!(
                    "Ignoring F08 with received {} <= maximum {}",
                    metadata.received_amount,
                    metadata.maximum_amount
                );
                return;
            }
            None => MaxPacketState::ImpreciseMax(attempted_source_amount.saturating_sub(1)),
        };

        let mut inner = self.inner.lock();
        let accepted = match (inner.state, candidate) {
            (MaxPacketState::UnknownMax, _) => true,
            (MaxPacketState::ImpreciseMax(current), MaxPacketState::ImpreciseMax(new)) => {
                new < current
            }
            (MaxPacketState::ImpreciseMax(_), MaxPacketState::PreciseMax(_)) => true,
            (MaxPacketState::PreciseMax(current), MaxPacketState::PreciseMax(new)) => new < current,
            (MaxPacketState::PreciseMax(_), _) => false,
            (_, MaxPacketState::UnknownMax) => false,
        };
        if !accepted {
            return;
        }

        let value = candidate.value();
        inner.state = candidate;
        inner.verified_path_capacity = inner.verified_path_capacity.min(value);
        tracing::debug!("Max packet amount reduced to {:?}", candidate);

        if value == 0 && !inner.no_capacity_available {
            inner.no_capacity_available = true;
            tracing::warn!("Path has no capacity for any packet");
        }
    }

    /// Record that `ack_amount` made it through the path
    pub fn adjust_path_capacity(&self, ack_amount: u64) {
        let mut inner = self.inner.lock();
        let value = inner.state.value();
        inner.verified_path_capacity = inner.verified_path_capacity.max(ack_amount).min(value);
    }

    /// Amount to try next: the limit, or the binary search midpoint
    pub fn next_max_packet_amount(&self) -> u64 {
        let inner = self.inner.lock();
        match inner.state {
            MaxPacketState::UnknownMax => u64::MAX,
            MaxPacketState::PreciseMax(value) => value,
            MaxPacketState::ImpreciseMax(value) => {
                let verified = inner.verified_path_capacity;
                if value <= verified {
                    value
                } else {
                    let gap = value - verified;
                    verified + gap / 2 + gap % 2
                }
            }
        }
    }

    /// Still searching for the limit
    pub fn is_probing(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.state, MaxPacketState::ImpreciseMax(value) if value > inner.verified_path_capacity)
    }

    /// Current state
    pub fn state(&self) -> MaxPacketState {
        self.inner.lock().state
    }

    /// Upper bound on the packet amount (`u64::MAX` when unknown)
    pub fn max_packet_amount(&self) -> u64 {
        self.inner.lock().state.value()
    }

    /// Largest amount known to get through
    pub fn verified_path_capacity(&self) -> u64 {
        self.inner.lock().verified_path_capacity
    }

    /// Sticky: the limit collapsed to zero
    pub fn no_capacity_available(&self) -> bool {
        self.inner.lock().no_capacity_available
    }
}
