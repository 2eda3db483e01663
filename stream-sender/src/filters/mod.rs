//! Send filter chain
//!
//! Each iteration of the send loop asks the chain what to do next. Filters
//! run in order and the first one that does not answer `Ready` decides:
//!
//! 1. **Failure**: terminal conditions (no capacity, idle, remote close)
//! 2. **Asset details**: attaches/validates denominations
//! 3. **Amount**: sizes the packet, or ends the payment
//! 4. **Pacing**: rate and concurrency limits
//! 5. **Sequence**: assigns the sequence number, forces a close at the ceiling
//!
//! Sequence runs only once every earlier filter agreed to send, so waiting
//! never burns a sequence number and the numbers on the wire stay dense.
//!
//! Every filter sees every reply through `apply`; max-packet, exchange-rate
//! and statistics filters only act there. Filters share state exclusively
//! through the trackers in `PaymentSharedStateTracker`.

pub mod amount;
pub mod asset_details;
pub mod exchange_rate;
pub mod failure;
pub mod max_packet;
pub mod pacing;
pub mod sequence;
pub mod statistics;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    error::PaymentError,
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

// Re-exports
pub use amount::AmountFilter;
pub use asset_details::AssetDetailsFilter;
pub use exchange_rate::ExchangeRateFilter;
pub use failure::FailureFilter;
pub use max_packet::MaxPacketFilter;
pub use pacing::PacingFilter;
pub use sequence::SequenceFilter;
pub use statistics::StatisticsFilter;

/// What the send loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Send the assembled packet
    Ready,
    /// Wait for a reply, or at most this long
    Wait(Option<Duration>),
    /// Target met, nothing in flight
    End,
    /// Terminal error
    Failed(PaymentError),
}

impl SendState {
    /// Stops the payment
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::End | SendState::Failed(_))
    }
}

/// One decision stage of the send loop
pub trait SendFilter: Send + Sync + fmt::Debug {
    /// Filter name for logs
    fn name(&self) -> &'static str;

    /// Vote on the next packet, annotating it when ready
    fn next_state(&self, request: &mut StreamPacketRequest) -> SendState;

    /// The packet was committed to the link
    fn on_send(&self, _request: &StreamPacketRequest) {}

    /// A reply came back
    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply);
}

/// Ordered filters
#[derive(Debug)]
pub struct FilterChain {
    filters: Vec<Box<dyn SendFilter>>,
}

impl FilterChain {
    /// Standard chain over one payment's trackers
    pub fn new(shared: Arc<PaymentSharedStateTracker>, config: &Config) -> Self {
        Self::from_filters(vec![
            Box::new(FailureFilter::new(Arc::clone(&shared), &config.failure)),
            Box::new(AssetDetailsFilter::new(Arc::clone(&shared))),
            Box::new(AmountFilter::new(Arc::clone(&shared))),
            Box::new(PacingFilter::new(Arc::clone(&shared))),
            Box::new(SequenceFilter::new(Arc::clone(&shared))),
            Box::new(MaxPacketFilter::new(Arc::clone(&shared))),
            Box::new(ExchangeRateFilter::new(Arc::clone(&shared))),
            Box::new(StatisticsFilter::new(shared)),
        ])
    }

    /// Chain from explicit filters
    pub fn from_filters(filters: Vec<Box<dyn SendFilter>>) -> Self {
        Self { filters }
    }

    /// First non-Ready vote wins
    pub fn next_state(&self, request: &mut StreamPacketRequest) -> SendState {
        for filter in &self.filters {
            let state = filter.next_state(request);
            if state != SendState::Ready {
                if state.is_terminal() {
                    tracing::debug!("{} filter ended the payment: {:?}", filter.name(), state);
                }
                return state;
            }
        }
        SendState::Ready
    }

    /// Commit a packet with every filter
    pub fn on_send(&self, request: &StreamPacketRequest) {
        for filter in &self.filters {
            filter.on_send(request);
        }
    }

    /// Feed a reply to every filter
    pub fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        for filter in &self.filters {
            filter.apply(request, reply);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use stream_core::{
        Denomination, ErrorCode, Frame, IlpAddress, IlpFulfill, IlpPacketType, IlpReject,
        IlpReply, SharedSecret, StreamConnection, StreamPacket,
    };

    use crate::{config::Config, trackers::PaymentSharedStateTracker, types::StreamPacketReply};

    pub fn shared_state(config: &Config) -> Arc<PaymentSharedStateTracker> {
        let connection = Arc::new(StreamConnection::new(
            IlpAddress::new("test.sender"),
            IlpAddress::new("test.receiver"),
            SharedSecret::generate(),
        ));
        Arc::new(PaymentSharedStateTracker::new(
            connection,
            Denomination::new("USD", 2),
            None,
            config,
        ))
    }

    pub fn fulfill(claimed: Option<u64>, frames: Vec<Frame>) -> StreamPacketReply {
        StreamPacketReply::new(
            IlpReply::Fulfill(IlpFulfill {
                fulfillment: [0u8; 32],
                data: vec![],
            }),
            claimed.map(|amount| StreamPacket::new(IlpPacketType::Fulfill, 1, amount, frames)),
        )
    }

    pub fn reject(code: ErrorCode, claimed: Option<u64>, frames: Vec<Frame>) -> StreamPacketReply {
        StreamPacketReply::new(
            IlpReply::Reject(IlpReject::new(code, "test")),
            claimed.map(|amount| StreamPacket::new(IlpPacketType::Reject, 1, amount, frames)),
        )
    }
}
