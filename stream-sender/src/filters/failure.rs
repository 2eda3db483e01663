//! Terminal failure detection
//!
//! Individual rejects are expected. The payment only gives up on
//! accumulated signals: repeated final rejects, a collapsed packet limit,
//! a high rolling failure rate, no progress for too long, or the receiver
//! closing the connection.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_core::{ErrorCode, ErrorFamily, IlpReply};

use super::{SendFilter, SendState};
use crate::{
    config::FailureConfig,
    error::PaymentError,
    trackers::PaymentSharedStateTracker,
    types::{StreamPacketReply, StreamPacketRequest},
};

#[derive(Debug)]
struct FailureState {
    consecutive_final_rejects: u32,
    last_progress_at: Instant,
    closed_by_recipient: bool,
}

/// Ends the payment on accumulated failure signals
#[derive(Debug)]
pub struct FailureFilter {
    shared: Arc<PaymentSharedStateTracker>,
    idle_timeout: Duration,
    max_consecutive_final_rejects: u32,
    min_rolling_samples: usize,
    max_failure_rate: f64,
    state: Mutex<FailureState>,
}

impl FailureFilter {
    /// Create new filter; the idle timer starts now
    pub fn new(shared: Arc<PaymentSharedStateTracker>, config: &FailureConfig) -> Self {
        Self {
            shared,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            max_consecutive_final_rejects: config.max_consecutive_final_rejects.max(1),
            min_rolling_samples: config.min_rolling_samples,
            max_failure_rate: config.max_failure_rate,
            state: Mutex::new(FailureState {
                consecutive_final_rejects: 0,
                last_progress_at: Instant::now(),
                closed_by_recipient: false,
            }),
        }
    }
}

/// Final rejects that say nothing about the path being broken
fn is_expected_final_reject(code: ErrorCode, authentic: bool) -> bool {
    code == ErrorCode::F08_AMOUNT_TOO_LARGE
        || (code == ErrorCode::F99_APPLICATION_ERROR && authentic)
}

impl SendFilter for FailureFilter {
    fn name(&self) -> &'static str {
        "failure"
    }

    fn next_state(&self, _request: &mut StreamPacketRequest) -> SendState {
        if self.shared.max_packet().no_capacity_available() {
            return SendState::Failed(PaymentError::ConnectorError);
        }

        let state = self.state.lock();
        if state.closed_by_recipient {
            return SendState::Failed(PaymentError::ClosedByRecipient);
        }
        if state.consecutive_final_rejects >= self.max_consecutive_final_rejects {
            return SendState::Failed(PaymentError::ConnectorError);
        }

        let statistics = self.shared.statistics();
        if statistics.rolling_sample_size() >= self.min_rolling_samples
            && statistics.rolling_failure_percentage() > self.max_failure_rate
        {
            tracing::warn!(
                "Rolling failure rate {:.1}% over {} packets",
                statistics.rolling_failure_percentage() * 100.0,
                statistics.rolling_sample_size()
            );
            return SendState::Failed(PaymentError::ExcessiveFailureRate);
        }

        if state.last_progress_at.elapsed() >= self.idle_timeout {
            tracing::warn!("No fulfillment for {:?}", self.idle_timeout);
            return SendState::Failed(PaymentError::IdleTimeout);
        }

        SendState::Ready
    }

    fn apply(&self, _request: &StreamPacketRequest, reply: &StreamPacketReply) {
        let mut state = self.state.lock();

        if reply
            .stream_packet
            .as_ref()
            .is_some_and(|packet| packet.has_close_frame())
        {
            if !state.closed_by_recipient {
                tracing::info!("Receiver closed the connection");
            }
            state.closed_by_recipient = true;
        }

        match &reply.reply {
            IlpReply::Fulfill(_) => {
                state.consecutive_final_rejects = 0;
                state.last_progress_at = reply.received_at.max(state.last_progress_at);
            }
            IlpReply::Reject(reject) => {
                if reject.code.family() == ErrorFamily::Final
                    && !is_expected_final_reject(reject.code, reply.is_authentic())
                {
                    state.consecutive_final_rejects += 1;
                    tracing::warn!(
                        "Final reject {} from {}: {}",
                        reject.code,
                        reject
                            .triggered_by
                            .as_ref()
                            .map(|address| address.as_str())
                            .unwrap_or("unknown"),
                        reject.message
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filters::test_support::{fulfill, reject, shared_state};
    use stream_core::{CloseCode, Frame, IlpReject};

    fn filter(config: &Config) -> (Arc<PaymentSharedStateTracker>, FailureFilter) {
        let shared = shared_state(config);
        let filter = FailureFilter::new(Arc::clone(&shared), &config.failure);
        (shared, filter)
    }

    fn next(filter: &FailureFilter) -> SendState {
        filter.next_state(&mut StreamPacketRequest::default())
    }

    #[test]
    fn test_ready_by_default() {
        let (_, filter) = filter(&Config::default());
        assert_eq!(next(&filter), SendState::Ready);
    }

    #[test]
    fn test_final_reject_is_terminal() {
        let (_, filter) = filter(&Config::default());
        let request = StreamPacketRequest::default();

        // F08 and authentic F99 are expected
        filter.apply(&request, &reject(ErrorCode::F08_AMOUNT_TOO_LARGE, None, vec![]));
        filter.apply(&request, &reject(ErrorCode::F99_APPLICATION_ERROR, Some(0), vec![]));
        filter.apply(&request, &reject(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, None, vec![]));
        assert_eq!(next(&filter), SendState::Ready);

        filter.apply(&request, &reject(ErrorCode::F02_UNREACHABLE, None, vec![]));
        assert_eq!(next(&filter), SendState::Failed(PaymentError::ConnectorError));
    }

    #[test]
    fn test_fulfill_resets_consecutive_count() {
        let mut config = Config::default();
        config.failure.max_consecutive_final_rejects = 2;
        let (_, filter) = filter(&config);
        let request = StreamPacketRequest::default();

        filter.apply(&request, &reject(ErrorCode::F99_APPLICATION_ERROR, None, vec![]));
        filter.apply(&request, &fulfill(Some(10), vec![]));
        filter.apply(&request, &reject(ErrorCode::F99_APPLICATION_ERROR, None, vec![]));
        assert_eq!(next(&filter), SendState::Ready);

        filter.apply(&request, &reject(ErrorCode::F02_UNREACHABLE, None, vec![]));
        assert_eq!(next(&filter), SendState::Failed(PaymentError::ConnectorError));
    }

    #[test]
    fn test_no_capacity() {
        let (shared, filter) = filter(&Config::default());
        let f08 = IlpReject::new(ErrorCode::F08_AMOUNT_TOO_LARGE, "too large");
        shared.max_packet().reduce_max_packet_amount(&f08, 1);
        assert_eq!(next(&filter), SendState::Failed(PaymentError::ConnectorError));
    }

    #[test]
    fn test_closed_by_recipient() {
        let (_, filter) = filter(&Config::default());
        let close = Frame::ConnectionClose {
            code: CloseCode::NoError,
            message: "bye".to_string(),
        };
        filter.apply(
            &StreamPacketRequest::default(),
            &reject(ErrorCode::F99_APPLICATION_ERROR, Some(0), vec![close]),
        );
        assert_eq!(next(&filter), SendState::Failed(PaymentError::ClosedByRecipient));
    }

    #[test]
    fn test_idle_timeout() {
        let mut config = Config::default();
        config.failure.idle_timeout_ms = 0;
        let (_, filter) = filter(&config);
        assert_eq!(next(&filter), SendState::Failed(PaymentError::IdleTimeout));
    }

    #[test]
    fn test_excessive_failure_rate() {
        let mut config = Config::default();
        config.failure.min_rolling_samples = 10;
        config.failure.max_failure_rate = 0.5;
        let (shared, filter) = filter(&config);

        for _ in 0..9 {
            shared.statistics().increment_reject_count();
        }
        assert_eq!(next(&filter), SendState::Ready);

        shared.statistics().increment_reject_count();
        assert_eq!(
            next(&filter),
            SendState::Failed(PaymentError::ExcessiveFailureRate)
        );
    }
}
