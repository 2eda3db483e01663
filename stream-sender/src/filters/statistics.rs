//! Packet outcome counting

use std::sync::Arc;

use super::{SendFilter, SendState};
use crate::{
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Counts fulfills and rejects of money packets
#[derive(Debug)]
pub struct StatisticsFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl StatisticsFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for StatisticsFilter {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn next_state(&self, _request: &mut StreamPacketRequest) -> SendState {
        SendState::Ready
    }

    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        if request.is_close {
            return;
        }
        if reply.is_fulfill() {
            self.shared.statistics().increment_fulfill_count();
        } else {
            self.shared.statistics().increment_reject_count();
        }
    }
}
