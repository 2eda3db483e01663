//! Retry with backoff around a link
//!
//! Only temporary (T-family) rejects are retried. Final and relative rejects
//! are returned to the caller as they are, and a fulfill is never resent.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use stream_core::{ErrorFamily, IlpPrepare, IlpReject, IlpReply};
use thiserror::Error;

use crate::{config::RetryConfig, link::Link};

/// Retry collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Every attempt ended in a retryable reject
    #[error("Gave up after {attempts} attempts, last reject {}", last_reject.code)]
    Exhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Reject from the final attempt
        last_reject: IlpReject,
    },
}

/// Exponential backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first send
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Cap on any single delay
    pub max_backoff: Duration,

    /// Growth factor
    pub multiplier: f64,

    /// Random spread (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `delay_for` with random spread applied
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max_backoff)
    }
}

/// Should this reject be resent
pub fn is_retryable(reject: &IlpReject) -> bool {
    reject.code.family() == ErrorFamily::Temporary
}

/// Send, resending after temporary rejects until the policy runs out
pub async fn send_with_retry<L: Link + ?Sized>(
    link: &L,
    prepare: IlpPrepare,
    policy: &RetryPolicy,
) -> Result<IlpReply, RetryError> {
    let mut attempt = 1;
    loop {
        let reply = link.send(prepare.clone()).await;
        let reject = match reply {
            IlpReply::Reject(reject) if is_retryable(&reject) => reject,
            other => return Ok(other),
        };

        let delay = policy.jittered_delay_for(attempt);
        let expired = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64)
            >= prepare.expires_at;
        if attempt >= policy.max_attempts || expired {
            tracing::debug!(
                "Giving up on prepare after {} attempts: {}",
                attempt,
                reject.code
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_reject: reject,
            });
        }

        tracing::debug!(
            "Temporary reject {} on attempt {}, retrying in {:?}",
            reject.code,
            attempt,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Link wrapper applying `send_with_retry` to every prepare
#[derive(Debug)]
pub struct RetryingLink<L> {
    inner: L,
    policy: RetryPolicy,
}

impl<L: Link> RetryingLink<L> {
    /// Create new retrying link
    pub fn new(inner: L, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped link
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: Link> Link for RetryingLink<L> {
    async fn send(&self, prepare: IlpPrepare) -> IlpReply {
        match send_with_retry(&self.inner, prepare, &self.policy).await {
            Ok(reply) => reply,
            Err(RetryError::Exhausted {
                attempts,
                last_reject,
            }) => {
                tracing::warn!(
                    "Retries exhausted after {} attempts: {}",
                    attempts,
                    last_reject.code
                );
                IlpReply::Reject(last_reject)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stream_core::{ErrorCode, IlpAddress, IlpFulfill};

    struct ScriptedLink {
        replies: Mutex<VecDeque<IlpReply>>,
        calls: AtomicU32,
    }

    impl ScriptedLink {
        fn new(replies: Vec<IlpReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Link for ScriptedLink {
        async fn send(&self, _prepare: IlpPrepare) -> IlpReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| reject(ErrorCode::T00_INTERNAL_ERROR))
        }
    }

    fn reject(code: ErrorCode) -> IlpReply {
        IlpReply::Reject(IlpReject::new(code, "scripted"))
    }

    fn fulfill() -> IlpReply {
        IlpReply::Fulfill(IlpFulfill {
            fulfillment: [1u8; 32],
            data: vec![],
        })
    }

    fn prepare() -> IlpPrepare {
        IlpPrepare {
            destination: IlpAddress::new("test.receiver"),
            amount: 100,
            execution_condition: [0u8; 32],
            expires_at: Utc::now() + chrono::Duration::seconds(30),
            data: vec![],
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        // Capped
        assert_eq!(policy.delay_for(8), Duration::from_millis(100));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut policy = policy(10);
        policy.jitter = 0.5;
        for _ in 0..100 {
            let delay = policy.jittered_delay_for(2);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_temporary_then_succeeds() {
        let link = ScriptedLink::new(vec![
            reject(ErrorCode::T04_INSUFFICIENT_LIQUIDITY),
            reject(ErrorCode::T01_PEER_UNREACHABLE),
            fulfill(),
        ]);

        let reply = send_with_retry(&link, prepare(), &policy(5)).await.unwrap();
        assert!(reply.is_fulfill());
        assert_eq!(link.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_and_relative_rejects_not_retried() {
        for code in [ErrorCode::F02_UNREACHABLE, ErrorCode::R00_TRANSFER_TIMED_OUT] {
            let link = ScriptedLink::new(vec![reject(code), fulfill()]);
            let reply = send_with_retry(&link, prepare(), &policy(5)).await.unwrap();
            assert_eq!(reply.as_reject().map(|r| r.code), Some(code));
            assert_eq!(link.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fulfill_never_resent() {
        let link = ScriptedLink::new(vec![fulfill(), fulfill()]);
        let reply = send_with_retry(&link, prepare(), &policy(5)).await.unwrap();
        assert!(reply.is_fulfill());
        assert_eq!(link.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted() {
        let link = ScriptedLink::new(vec![]);
        let result = send_with_retry(&link, prepare(), &policy(3)).await;

        match result {
            Err(RetryError::Exhausted {
                attempts,
                last_reject,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_reject.code, ErrorCode::T00_INTERNAL_ERROR);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(link.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_link_returns_last_reject() {
        let link = RetryingLink::new(ScriptedLink::new(vec![]), policy(2));
        let reply = link.send(prepare()).await;
        assert_eq!(
            reply.as_reject().map(|r| r.code),
            Some(ErrorCode::T00_INTERNAL_ERROR)
        );
        assert_eq!(link.inner().calls(), 2);
    }
}
