//! Denomination exchange with the receiver

use std::sync::Arc;
use stream_core::Frame;

use super::{SendFilter, SendState};
use crate::{
    error::PaymentError,
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Announces our asset until the receiver answers; checks theirs
#[derive(Debug)]
pub struct AssetDetailsFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl AssetDetailsFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

/// Frames announcing the sender, sent until the receiver has replied
pub fn announcement_frames(shared: &PaymentSharedStateTracker) -> Vec<Frame> {
    vec![
        Frame::ConnectionNewAddress {
            source_address: shared.connection().source_address().to_string(),
        },
        Frame::ConnectionAssetDetails {
            denomination: shared.asset_details().source().clone(),
        },
    ]
}

impl SendFilter for AssetDetailsFilter {
    fn name(&self) -> &'static str {
        "asset_details"
    }

    fn next_state(&self, request: &mut StreamPacketRequest) -> SendState {
        let assets = self.shared.asset_details();
        if assets.has_conflict() {
            return SendState::Failed(PaymentError::DestinationAssetConflict);
        }
        if !assets.remote_replied() {
            request.frames.extend(announcement_frames(&self.shared));
        }
        SendState::Ready
    }

    fn apply(&self, _request: &StreamPacketRequest, reply: &StreamPacketReply) {
        let Some(packet) = &reply.stream_packet else {
            return;
        };
        let assets = self.shared.asset_details();
        assets.mark_remote_replied();
        if let Some(denomination) = packet.asset_details() {
            // Conflict is recorded in the tracker and reported on the next vote
            if let Err(error) = assets.record_remote(denomination) {
                tracing::debug!("Receiver announced {}: {}", denomination, error);
            }
        }
    }
}
