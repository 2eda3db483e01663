//! AIMD congestion window over the amount in flight

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stream_core::{ErrorCode, IlpReject};

/// Window growth mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionPhase {
    /// Double per fulfillment
    SlowStart,
    /// Add a fixed increment per fulfillment
    CongestionAvoidance,
}

#[derive(Debug)]
struct CongestionState {
    phase: CongestionPhase,
    max_in_flight: u64,
}

/// Limits the source amount in flight
#[derive(Debug)]
pub struct CongestionController {
    additive_increase: u64,
    state: Mutex<CongestionState>,
}

impl CongestionController {
    /// Create new controller in slow start
    pub fn new(initial_window: u64, additive_increase: u64) -> Self {
        Self {
            additive_increase,
            state: Mutex::new(CongestionState {
                phase: CongestionPhase::SlowStart,
                max_in_flight: initial_window.max(1),
            }),
        }
    }

    /// A packet was fulfilled
    pub fn on_fulfill(&self) {
        let mut state = self.state.lock();
        state.max_in_flight = match state.phase {
            CongestionPhase::SlowStart => state.max_in_flight.saturating_mul(2),
            CongestionPhase::CongestionAvoidance => {
                state.max_in_flight.saturating_add(self.additive_increase)
            }
        };
    }

    /// A packet was rejected; only liquidity rejects shrink the window
    pub fn on_reject(&self, reject: &IlpReject) {
        if reject.code != ErrorCode::T04_INSUFFICIENT_LIQUIDITY {
            return;
        }
        let mut state = self.state.lock();
        state.max_in_flight = (state.max_in_flight / 2).max(1);
        state.phase = CongestionPhase::CongestionAvoidance;
        tracing::debug!("Congestion window halved to {}", state.max_in_flight);
    }

    /// Current window
    pub fn max_in_flight(&self) -> u64 {
        self.state.lock().max_in_flight
    }

    /// Current phase
    pub fn phase(&self) -> CongestionPhase {
        self.state.lock().phase
    }

    /// Room left in the window
    pub fn available_amount(&self, in_flight: u64) -> u64 {
        self.max_in_flight().saturating_sub(in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t04() -> IlpReject {
        IlpReject::new(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, "busy")
    }

    #[test]
    fn test_slow_start_doubles_then_halves() {
        let controller = CongestionController::new(1_000, 100);
        for expected in [2_000, 4_000, 8_000] {
            controller.on_fulfill();
            assert_eq!(controller.max_in_flight(), expected);
        }
        assert_eq!(controller.phase(), CongestionPhase::SlowStart);

        controller.on_reject(&t04());
        assert_eq!(controller.max_in_flight(), 4_000);
        assert_eq!(controller.phase(), CongestionPhase::CongestionAvoidance);

        controller.on_fulfill();
        assert_eq!(controller.max_in_flight(), 4_100);

        controller.on_reject(&t04());
        assert_eq!(controller.max_in_flight(), 2_050);
    }

    #[test]
    fn test_window_never_below_one() {
        let controller = CongestionController::new(3, 1);
        for _ in 0..10 {
            controller.on_reject(&t04());
        }
        assert_eq!(controller.max_in_flight(), 1);
        assert_eq!(controller.available_amount(0), 1);
        assert_eq!(controller.available_amount(5), 0);
    }

    #[test]
    fn test_other_rejects_ignored() {
        let controller = CongestionController::new(100, 10);
        controller.on_reject(&IlpReject::new(ErrorCode::F99_APPLICATION_ERROR, "no"));
        assert_eq!(controller.max_in_flight(), 100);
        assert_eq!(controller.phase(), CongestionPhase::SlowStart);
    }

    #[test]
    fn test_saturates() {
        let controller = CongestionController::new(u64::MAX / 2 + 1, 1);
        controller.on_fulfill();
        assert_eq!(controller.max_in_flight(), u64::MAX);
    }
}
