//! Sequence numbering and the safe-sequence ceiling

use std::sync::Arc;
use stream_core::{CloseCode, Frame};

use super::{SendFilter, SendState};
use crate::{
    error::PaymentError,
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Assigns sequence numbers; past the ceiling turns the packet into a close
#[derive(Debug)]
pub struct SequenceFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl SequenceFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for SequenceFilter {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn next_state(&self, request: &mut StreamPacketRequest) -> SendState {
        let connection = self.shared.connection();
        let sequence = match connection.next_sequence() {
            Ok(sequence) => sequence,
            Err(_) => return SendState::Failed(PaymentError::ExceededMaxSequence),
        };
        request.sequence = sequence;

        if connection.sequence_is_safe_for_single_shared_secret(sequence) {
            return SendState::Ready;
        }

        tracing::warn!(
            "Sequence {} exceeds the safe limit, closing connection {}",
            sequence,
            connection.id()
        );
        request.is_close = true;
        request.source_amount = 0;
        request.min_destination_amount = 0;
        request.estimated_destination_amount = 0;
        request.delivery_deficit = 0;
        request.frames = vec![Frame::ConnectionClose {
            code: CloseCode::ApplicationError,
            message: "Exceeded maximum safe sequence".to_string(),
        }];
        connection.close();
        SendState::Failed(PaymentError::ExceededMaxSequence)
    }

    fn apply(&self, _request: &StreamPacketRequest, _reply: &StreamPacketReply) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::trackers::PaymentSharedStateTracker;
    use stream_core::{
        ConnectionState, Denomination, IlpAddress, SharedSecret, StreamConnection,
        MAX_SAFE_SEQUENCE,
    };

    fn filter_after(last_sequence: u64) -> (Arc<StreamConnection>, SequenceFilter) {
        let connection = Arc::new(
            StreamConnection::new(
                IlpAddress::new("test.sender"),
                IlpAddress::new("test.receiver"),
                SharedSecret::generate(),
            )
            .starting_after(last_sequence),
        );
        let shared = Arc::new(PaymentSharedStateTracker::new(
            Arc::clone(&connection),
            Denomination::new("USD", 2),
            None,
            &Config::default(),
        ));
        (connection, SequenceFilter::new(shared))
    }

    #[test]
    fn test_assigns_sequence() {
        let (_, filter) = filter_after(0);
        let mut request = StreamPacketRequest::default();
        assert_eq!(filter.next_state(&mut request), SendState::Ready);
        assert_eq!(request.sequence, 1);
        assert!(!request.is_close);
    }

    #[test]
    fn test_ceiling_is_still_safe() {
        let (connection, filter) = filter_after(MAX_SAFE_SEQUENCE - 1);
        let mut request = StreamPacketRequest::default();
        assert_eq!(filter.next_state(&mut request), SendState::Ready);
        assert_eq!(request.sequence, MAX_SAFE_SEQUENCE);
        assert_ne!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_past_ceiling_forces_close() {
        let (connection, filter) = filter_after(MAX_SAFE_SEQUENCE);
        let mut request = StreamPacketRequest {
            source_amount: 500,
            min_destination_amount: 450,
            delivery_deficit: 1,
            frames: vec![Frame::StreamMoney {
                stream_id: 1,
                shares: 1,
            }],
            ..Default::default()
        };

        assert_eq!(
            filter.next_state(&mut request),
            SendState::Failed(PaymentError::ExceededMaxSequence)
        );
        assert!(request.is_close);
        assert_eq!(request.source_amount, 0);
        assert_eq!(request.min_destination_amount, 0);
        assert_eq!(request.delivery_deficit, 0);
        assert!(matches!(
            request.frames.as_slice(),
            [Frame::ConnectionClose { .. }]
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);

        // Nothing more can be numbered
        let mut next = StreamPacketRequest::default();
        assert_eq!(
            filter.next_state(&mut next),
            SendState::Failed(PaymentError::ExceededMaxSequence)
        );
        assert!(!next.is_close);
    }
}
