//! Packet pacing
//!
//! Spaces packets by `max(1000 / packets_per_second, rtt / max_in_flight)`
//! milliseconds and caps the number of unanswered packets.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use stream_core::{ErrorCode, IlpReply};

use crate::config::PacingConfig;

#[derive(Debug)]
struct PacingState {
    packets_per_second: f64,
    average_rtt_ms: f64,
    last_packet_sent_at: Option<Instant>,
    in_flight: usize,
}

/// Send rate and concurrency limiter
#[derive(Debug)]
pub struct PacingTracker {
    config: PacingConfig,
    state: Mutex<PacingState>,
}

impl PacingTracker {
    /// Create new tracker
    pub fn new(config: PacingConfig) -> Self {
        let state = PacingState {
            packets_per_second: config.initial_packets_per_second,
            average_rtt_ms: config.initial_rtt_ms as f64,
            last_packet_sent_at: None,
            in_flight: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Minimum gap between two sends
    pub fn packet_frequency(&self) -> Duration {
        let state = self.state.lock();
        self.frequency(&state)
    }

    fn frequency(&self, state: &PacingState) -> Duration {
        let rate_gap = 1000.0 / state.packets_per_second;
        let rtt_gap = state.average_rtt_ms / self.config.max_in_flight as f64;
        Duration::from_micros((rate_gap.max(rtt_gap) * 1000.0).round() as u64)
    }

    /// `None` if a packet may go at `now`, else how long to wait
    pub fn next_packet_delay(&self, now: Instant) -> Option<Duration> {
        let state = self.state.lock();
        let frequency = self.frequency(&state);

        if state.in_flight >= self.config.max_in_flight {
            return Some(frequency);
        }

        let last = state.last_packet_sent_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= frequency {
            None
        } else {
            Some(frequency - elapsed)
        }
    }

    /// A packet left at `now`
    pub fn on_packet_sent(&self, now: Instant) {
        let mut state = self.state.lock();
        state.last_packet_sent_at = Some(now);
        state.in_flight += 1;
    }

    /// A reply arrived for a packet sent at `sent_at`
    pub fn on_reply(&self, sent_at: Instant, received_at: Instant, reply: &IlpReply) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let sample_ms = received_at.saturating_duration_since(sent_at).as_secs_f64() * 1000.0;
        let weight = self.config.rtt_smoothing;
        state.average_rtt_ms = weight * sample_ms + (1.0 - weight) * state.average_rtt_ms;

        match reply {
            IlpReply::Fulfill(_) => {
                state.packets_per_second = (state.packets_per_second
                    + self.config.additive_increase)
                    .min(self.config.max_packets_per_second);
            }
            IlpReply::Reject(reject) if reject.code == ErrorCode::T04_INSUFFICIENT_LIQUIDITY => {
                state.packets_per_second = (state.packets_per_second / 2.0)
                    .max(self.config.min_packets_per_second);
                tracing::debug!(
                    "Liquidity reject, pacing down to {:.1} packets/s",
                    state.packets_per_second
                );
            }
            IlpReply::Reject(_) => {}
        }
    }

    /// Unanswered packets
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Current send rate
    pub fn packets_per_second(&self) -> f64 {
        self.state.lock().packets_per_second
    }

    /// Smoothed round-trip time
    pub fn average_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.state.lock().average_rtt_ms / 1000.0)
    }

    /// Concurrency ceiling
    pub fn max_in_flight(&self) -> usize {
        self.config.max_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_core::{IlpFulfill, IlpReject};

    fn fulfill() -> IlpReply {
        IlpReply::Fulfill(IlpFulfill {
            fulfillment: [0u8; 32],
            data: vec![],
        })
    }

    fn t04() -> IlpReply {
        IlpReply::Reject(IlpReject::new(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, "busy"))
    }

    #[test]
    fn test_initial_frequency() {
        let pacing = PacingTracker::new(PacingConfig::default());
        // max(1000 / 40, 200 / 20) = 25ms
        assert_eq!(pacing.packet_frequency(), Duration::from_millis(25));
        assert_eq!(pacing.next_packet_delay(Instant::now()), None);
    }

    #[test]
    fn test_rtt_dominates_when_slow() {
        let pacing = PacingTracker::new(PacingConfig::default());
        let sent = Instant::now();
        pacing.on_packet_sent(sent);
        let reject = IlpReply::Reject(IlpReject::new(ErrorCode::F99_APPLICATION_ERROR, "x"));
        pacing.on_reply(sent, sent + Duration::from_millis(2_000), &reject);

        // 0.9 × 2000 + 0.1 × 200 = 1820ms
        let rtt = pacing.average_rtt().as_secs_f64() * 1000.0;
        assert!((rtt - 1_820.0).abs() < 1e-6);
        // 1820 / 20 = 91ms > 25ms
        let frequency = pacing.packet_frequency().as_secs_f64() * 1000.0;
        assert!((frequency - 91.0).abs() < 1e-6);
    }

    #[test]
    fn test_spacing_between_sends() {
        let pacing = PacingTracker::new(PacingConfig::default());
        let now = Instant::now();
        pacing.on_packet_sent(now);

        let delay = pacing.next_packet_delay(now + Duration::from_millis(10)).unwrap();
        assert_eq!(delay, Duration::from_millis(15));
        assert_eq!(pacing.next_packet_delay(now + Duration::from_millis(25)), None);
    }

    #[test]
    fn test_in_flight_ceiling() {
        let config = PacingConfig {
            max_in_flight: 2,
            ..PacingConfig::default()
        };
        let pacing = PacingTracker::new(config);
        let start = Instant::now();
        pacing.on_packet_sent(start);
        pacing.on_packet_sent(start);

        let later = start + Duration::from_secs(10);
        assert!(pacing.next_packet_delay(later).is_some());

        pacing.on_reply(start, later, &fulfill());
        assert_eq!(pacing.in_flight(), 1);
        assert_eq!(pacing.next_packet_delay(later), None);
    }

    #[test]
    fn test_rate_adjustments() {
        let pacing = PacingTracker::new(PacingConfig::default());
        let now = Instant::now();

        pacing.on_reply(now, now, &fulfill());
        assert_eq!(pacing.packets_per_second(), 40.5);

        pacing.on_reply(now, now, &t04());
        assert_eq!(pacing.packets_per_second(), 20.25);

        for _ in 0..20 {
            pacing.on_reply(now, now, &t04());
        }
        assert_eq!(pacing.packets_per_second(), 1.0);

        for _ in 0..1_000 {
            pacing.on_reply(now, now, &fulfill());
        }
        assert_eq!(pacing.packets_per_second(), 200.0);
        // Replies without a matching send never drive in-flight negative
        assert_eq!(pacing.in_flight(), 0);
    }
}
