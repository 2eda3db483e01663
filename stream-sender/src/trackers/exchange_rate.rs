//! Realized exchange rate bounds
//!
//! Every authentic reply tells us that `source` units became `received`
//! destination units. Intermediaries floor when converting, so the true rate
//! lies in `[received / source, (received + 1) / source)`. The tracker keeps
//! the intersection of all such intervals, and starts over when a new
//! observation contradicts it (the path rate moved).

use parking_lot::Mutex;
use std::collections::HashMap;
use stream_core::Ratio;

use crate::error::PaymentError;

#[derive(Debug, Default)]
struct RateState {
    lower_bound: Option<Ratio>,
    upper_bound: Option<Ratio>,
    sent_to_received: HashMap<u64, u64>,
    received_to_sent: HashMap<u64, u64>,
    reset_count: u64,
}

impl RateState {
    fn reset(&mut self, lower: Ratio, upper: Ratio) {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self.sent_to_received.clear();
        self.received_to_sent.clear();
    }

    fn remember(&mut self, source_amount: u64, received_amount: u64) {
        self.sent_to_received.insert(source_amount, received_amount);
        self.received_to_sent.insert(received_amount, source_amount);
    }
}

/// Two-sided bound on the path exchange rate
#[derive(Debug, Default)]
pub struct ExchangeRateTracker {
    state: Mutex<RateState>,
}

fn observation_bounds(source_amount: u64, received_amount: u64) -> Option<(Ratio, Ratio)> {
    let lower = Ratio::from_amounts(received_amount, source_amount)?;
    let upper = Ratio::new(received_amount as u128 + 1, source_amount as u128)?;
    Some((lower, upper))
}

impl ExchangeRateTracker {
    /// Create new tracker with no observations
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed both bounds from an external rate, `destination / source`
    pub fn initialize_rates(&self, source_amount: u64, destination_amount: u64) {
        let Some((lower, upper)) = observation_bounds(source_amount, destination_amount) else {
            return;
        };
        let mut state = self.state.lock();
        state.reset(lower, upper);
        tracing::debug!("Exchange rate seeded at [{}, {})", lower, upper);
    }

    /// Fold in an observed (sent, received) pair
    pub fn update_rate(&self, source_amount: u64, received_amount: u64) {
        let Some((lower, upper)) = observation_bounds(source_amount, received_amount) else {
            return;
        };
        let mut state = self.state.lock();

        let memo_conflict = state
            .sent_to_received
            .get(&source_amount)
            .is_some_and(|known| *known != received_amount);

        match (state.lower_bound, state.upper_bound) {
            (Some(current_lower), Some(current_upper)) if !memo_conflict => {
                let disjoint = upper <= current_lower || lower >= current_upper;
                if disjoint {
                    tracing::info!(
                        "Exchange rate moved: [{}, {}) outside [{}, {}), resetting",
                        lower,
                        upper,
                        current_lower,
                        current_upper
                    );
                    state.reset(lower, upper);
                    state.reset_count += 1;
                } else {
                    if lower > current_lower
                        || (lower == current_lower && lower.is_more_precise_than(&current_lower))
                    {
                        state.lower_bound = Some(lower);
                    }
                    if upper < current_upper
                        || (upper == current_upper && upper.is_more_precise_than(&current_upper))
                    {
                        state.upper_bound = Some(upper);
                    }
                }
            }
            (Some(_), Some(_)) => {
                tracing::info!(
                    "Exchange rate moved: {} now delivers {}, resetting",
                    source_amount,
                    received_amount
                );
                state.reset(lower, upper);
                state.reset_count += 1;
            }
            _ => state.reset(lower, upper),
        }

        state.remember(source_amount, received_amount);
    }

    /// (low, high) destination amounts for a source amount
    pub fn estimate_destination_amount(&self, source_amount: u64) -> Option<(u64, u64)> {
        let state = self.state.lock();
        if let Some(received) = state.sent_to_received.get(&source_amount) {
            return Some((*received, *received));
        }

        let (lower, upper) = (state.lower_bound?, state.upper_bound?);
        let low = lower.multiply_floor(source_amount);
        let high = upper
            .multiply_ceil(source_amount)
            .saturating_sub(1)
            .max(low);
        Some((low, high))
    }

    /// (low, high) source amounts needed to deliver a destination amount.
    ///
    /// `high` always delivers at least `destination_amount` while the rate
    /// stays above the lower bound. `None` when the lower bound is zero.
    pub fn estimate_source_amount(&self, destination_amount: u64) -> Option<(u64, u64)> {
        let state = self.state.lock();
        if let Some(sent) = state.received_to_sent.get(&destination_amount) {
            return Some((*sent, *sent));
        }

        let (lower, upper) = (state.lower_bound?, state.upper_bound?);
        let high = lower.reciprocal()?.multiply_ceil(destination_amount);
        let low = upper
            .reciprocal()
            .map(|inverse| inverse.multiply_floor(destination_amount).saturating_add(1))
            .unwrap_or(high)
            .min(high);
        Some((low, high))
    }

    /// Inclusive lower bound
    pub fn lower_bound_rate(&self) -> Result<Ratio, PaymentError> {
        self.state
            .lock()
            .lower_bound
            .ok_or(PaymentError::RateProbeFailed)
    }

    /// Exclusive upper bound
    pub fn upper_bound_rate(&self) -> Result<Ratio, PaymentError> {
        self.state
            .lock()
            .upper_bound
            .ok_or(PaymentError::RateProbeFailed)
    }

    /// Anything observed or seeded yet
    pub fn has_rate(&self) -> bool {
        self.state.lock().lower_bound.is_some()
    }

    /// Times the bounds were thrown away
    pub fn reset_count(&self) -> u64 {
        self.state.lock().reset_count
    }
}
