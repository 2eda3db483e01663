//! Feeds receiver claims to the exchange rate bounds

use std::sync::Arc;

use super::{SendFilter, SendState};
use crate::{
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

/// Narrows the rate interval from authentic replies
#[derive(Debug)]
pub struct ExchangeRateFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl ExchangeRateFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for ExchangeRateFilter {
    fn name(&self) -> &'static str {
        "exchange_rate"
    }

    fn next_state(&self, _request: &mut StreamPacketRequest) -> SendState {
        SendState::Ready
    }

    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        if request.source_amount == 0 {
            return;
        }
        if let Some(received) = reply.destination_amount() {
            self.shared
                .exchange_rate()
                .update_rate(request.source_amount, received);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filters::test_support::{fulfill, reject, shared_state};
    use stream_core::{ErrorCode, Ratio};

    #[test]
    fn test_only_authentic_claims_count() {
        let shared = shared_state(&Config::default());
        let filter = ExchangeRateFilter::new(Arc::clone(&shared));
        let request = StreamPacketRequest {
            source_amount: 100,
            ..Default::default()
        };

        filter.apply(&request, &reject(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, None, vec![]));
        assert!(!shared.exchange_rate().has_rate());

        filter.apply(&request, &reject(ErrorCode::F99_APPLICATION_ERROR, Some(250), vec![]));
        assert_eq!(
            shared.exchange_rate().lower_bound_rate(),
            Ok(Ratio::new(5, 2).unwrap())
        );

        filter.apply(&request, &fulfill(Some(250), vec![]));
        assert_eq!(shared.exchange_rate().reset_count(), 0);
    }
}
