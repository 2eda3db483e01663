//! Send rate, concurrency and congestion limits

use std::sync::Arc;
use std::time::Instant;
use stream_core::IlpReply;

use super::{SendFilter, SendState};
use crate::{
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Holds packets back until the pacing tracker allows them
#[derive(Debug)]
pub struct PacingFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl PacingFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for PacingFilter {
    fn name(&self) -> &'static str {
        "pacing"
    }

    fn next_state(&self, _request: &mut StreamPacketRequest) -> SendState {
        match self.shared.pacing().next_packet_delay(Instant::now()) {
            Some(delay) => SendState::Wait(Some(delay)),
            None => SendState::Ready,
        }
    }

    fn on_send(&self, request: &StreamPacketRequest) {
        if request.is_close {
            return;
        }
        self.shared.pacing().on_packet_sent(request.sent_at);
    }

    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        if request.is_close {
            return;
        }
        self.shared
            .pacing()
            .on_reply(request.sent_at, reply.received_at, &reply.reply);

        if let Some(congestion) = self.shared.congestion() {
            match &reply.reply {
                IlpReply::Fulfill(_) => congestion.on_fulfill(),
                IlpReply::Reject(reject) => congestion.on_reject(reject),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filters::test_support::{fulfill, reject, shared_state};
    use stream_core::ErrorCode;

    #[test]
    fn test_waits_between_packets() {
        let shared = shared_state(&Config::default());
        let filter = PacingFilter::new(Arc::clone(&shared));

        let mut request = StreamPacketRequest::default();
        assert_eq!(filter.next_state(&mut request), SendState::Ready);

        request.sent_at = Instant::now();
        filter.on_send(&request);
        assert_eq!(shared.pacing().in_flight(), 1);
        assert!(matches!(
            filter.next_state(&mut StreamPacketRequest::default()),
            SendState::Wait(Some(_))
        ));

        filter.apply(&request, &fulfill(Some(1), vec![]));
        assert_eq!(shared.pacing().in_flight(), 0);
    }

    #[test]
    fn test_in_flight_ceiling() {
        let mut config = Config::default();
        config.pacing.max_in_flight = 2;
        let shared = shared_state(&config);
        let filter = PacingFilter::new(Arc::clone(&shared));

        let mut request = StreamPacketRequest::default();
        request.sent_at = Instant::now() - std::time::Duration::from_secs(10);
        filter.on_send(&request);
        filter.on_send(&request);
        assert!(matches!(
            filter.next_state(&mut StreamPacketRequest::default()),
            SendState::Wait(Some(_))
        ));
    }

    #[test]
    fn test_liquidity_reject_slows_down() {
        let shared = shared_state(&Config::default());
        let filter = PacingFilter::new(Arc::clone(&shared));
        let window = shared.congestion().unwrap().max_in_flight();
        let rate = shared.pacing().packets_per_second();

        let request = StreamPacketRequest::default();
        filter.on_send(&request);
        filter.apply(
            &request,
            &reject(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, None, vec![]),
        );

        assert_eq!(shared.pacing().packets_per_second(), rate / 2.0);
        assert_eq!(shared.congestion().unwrap().max_in_flight(), window / 2);
    }

    #[test]
    fn test_close_packets_bypass() {
        let shared = shared_state(&Config::default());
        let filter = PacingFilter::new(Arc::clone(&shared));
        let request = StreamPacketRequest {
            is_close: true,
            ..Default::default()
        };
        filter.on_send(&request);
        assert_eq!(shared.pacing().in_flight(), 0);
    }
}
