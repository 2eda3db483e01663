//! Feeds packet outcomes to max packet discovery

use std::sync::Arc;
use stream_core::ErrorCode;

use super::{SendFilter, SendState};
use crate::{
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Narrows the path's packet limit from F08s and confirmed amounts
#[derive(Debug)]
pub struct MaxPacketFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl MaxPacketFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for MaxPacketFilter {
    fn name(&self) -> &'static str {
        "max_packet"
    }

    fn next_state(&self, _request: &mut StreamPacketRequest) -> SendState {
        SendState::Ready
    }

    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        if request.source_amount == 0 {
            return;
        }
        let max_packet = self.shared.max_packet();
        match reply.reject() {
            Some(reject) if reject.code == ErrorCode::F08_AMOUNT_TOO_LARGE => {
                max_packet.reduce_max_packet_amount(reject, request.source_amount);
            }
            // Reached the receiver, so every hop let it through
            Some(_) if reply.is_authentic() => {
                max_packet.adjust_path_capacity(request.source_amount)
            }
            Some(_) => {}
            None => max_packet.adjust_path_capacity(request.source_amount),
        }
    }
}
