//! Payment target and money accounting
//!
//! # Invariants
//!
//! - No counter ever goes below zero: subtraction clamps
//! - `source_amount_in_flight + amount_sent <= max_source_amount` once the
//!   target is set (enforced by the amount filter when it sizes packets)
//! - Target conditions are written once and never change
//! - `protocol_violation` and `remote_receive_max_incompatible` only go
//!   from false to true

use parking_lot::Mutex;
use std::sync::Arc;
use stream_core::Ratio;

use crate::{
    error::PaymentError,
    trackers::ExchangeRateTracker,
    types::{PaymentEstimate, PaymentType},
    Error, Result,
};

/// Fixed once the payment starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentTargetConditions {
    /// Fixed side
    pub payment_type: PaymentType,

    /// Destination units per source unit that must be honored
    pub min_exchange_rate: Ratio,

    /// Least the receiver must get
    pub min_delivery_amount: u64,

    /// Most we will send
    pub max_source_amount: u64,
}

/// Consistent copy of the tracker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmountSnapshot {
    /// Target, once set
    pub target: Option<PaymentTargetConditions>,

    /// Source units fulfilled
    pub amount_sent: u64,

    /// Destination units fulfilled
    pub amount_delivered: u64,

    /// Source units in unanswered packets
    pub source_amount_in_flight: u64,

    /// Guaranteed destination units in unanswered packets
    pub destination_amount_in_flight: u64,

    /// Rounding budget left for the final packet
    pub available_delivery_shortfall: u64,

    /// Receiver's advertised limit
    pub remote_receive_max: Option<u64>,

    /// Receiver fulfilled below a packet minimum
    pub protocol_violation: bool,

    /// Receiver's limit is below what must be delivered
    pub remote_receive_max_incompatible: bool,
}

#[derive(Debug, Default)]
struct AmountState {
    target: Option<PaymentTargetConditions>,
    amount_sent: u64,
    amount_delivered: u64,
    source_amount_in_flight: u64,
    destination_amount_in_flight: u64,
    available_delivery_shortfall: u64,
    max_delivery_shortfall: u64,
    remote_receive_max: Option<u64>,
    protocol_violation: bool,
    remote_receive_max_incompatible: bool,
}

impl AmountState {
    fn check_receive_max(&mut self) {
        let (Some(target), Some(receive_max)) = (self.target, self.remote_receive_max) else {
            return;
        };
        if receive_max < target.min_delivery_amount && !self.remote_receive_max_incompatible {
            tracing::warn!(
                "Receiver accepts at most {} but {} must be delivered",
                receive_max,
                target.min_delivery_amount
            );
            self.remote_receive_max_incompatible = true;
        }
    }
}

/// Ledger of one payment attempt
#[derive(Debug)]
pub struct AmountTracker {
    exchange_rate: Arc<ExchangeRateTracker>,
    state: Mutex<AmountState>,
}

/// Can packets of at most `max_packet_amount` enforce `min_exchange_rate`
/// when the path rate is at least `lower_bound`
pub fn check_feasibility(
    lower_bound: Ratio,
    min_exchange_rate: Ratio,
    max_packet_amount: u64,
) -> std::result::Result<(), PaymentError> {
    if lower_bound.floor() >= min_exchange_rate.ceil() {
        return Ok(());
    }

    let margin = match lower_bound.checked_sub(&min_exchange_rate) {
        Some(margin) if margin.is_positive() => margin,
        _ => return Err(PaymentError::InsufficientExchangeRate),
    };

    // Smallest packet whose delivery floor clears the minimum by a whole unit
    let min_packet_amount = margin
        .reciprocal()
        .map(|inverse| inverse.ceil())
        .unwrap_or(u128::MAX);
    if min_packet_amount > max_packet_amount as u128 {
        return Err(PaymentError::ExchangeRateRoundingError);
    }
    Ok(())
}

impl AmountTracker {
    /// Create new tracker reading rates from `exchange_rate`
    pub fn new(exchange_rate: Arc<ExchangeRateTracker>) -> Self {
        Self {
            exchange_rate,
            state: Mutex::new(AmountState::default()),
        }
    }

    /// Validate and fix the payment target
    pub fn set_payment_target(
        &self,
        payment_type: PaymentType,
        min_exchange_rate: Ratio,
        max_packet_amount: u64,
        target_amount: u64,
    ) -> Result<PaymentEstimate> {
        if self.state.lock().target.is_some() {
            return Err(Error::Config("Payment target already set".to_string()));
        }

        let lower_bound = self.exchange_rate.lower_bound_rate()?;
        check_feasibility(lower_bound, min_exchange_rate, max_packet_amount)?;

        let (min_delivery_amount, max_source_amount) = match payment_type {
            PaymentType::FixedSend => {
                let min_delivery = match target_amount {
                    0 => 0,
                    amount => min_exchange_rate.multiply_ceil(amount - 1),
                };
                (min_delivery, target_amount)
            }
            PaymentType::FixedDelivery => {
                let inverse = min_exchange_rate
                    .reciprocal()
                    .filter(|_| min_exchange_rate.is_positive())
                    .ok_or(PaymentError::UnenforceableDelivery)?;
                let max_source = inverse.multiply_ceil(target_amount).saturating_add(1);
                (target_amount, max_source)
            }
        };

        let target = PaymentTargetConditions {
            payment_type,
            min_exchange_rate,
            min_delivery_amount,
            max_source_amount,
        };

        let source_to_send = match payment_type {
            PaymentType::FixedSend => max_source_amount,
            PaymentType::FixedDelivery => self
                .exchange_rate
                .estimate_source_amount(target_amount)
                .map(|(_, high)| high)
                .unwrap_or(max_source_amount)
                .min(max_source_amount),
        };
        let (estimated_delivery_low, estimated_delivery_high) = self
            .exchange_rate
            .estimate_destination_amount(source_to_send)
            .unwrap_or((0, 0));
        let packet_size = max_packet_amount.max(1);
        let estimated_packet_count =
            source_to_send / packet_size + u64::from(source_to_send % packet_size != 0);

        {
            let mut state = self.state.lock();
            if state.target.is_some() {
                return Err(Error::Config("Payment target already set".to_string()));
            }
            let shortfall = min_exchange_rate.multiply_ceil(1);
            state.target = Some(target);
            state.max_delivery_shortfall = shortfall;
            state.available_delivery_shortfall = shortfall;
            state.check_receive_max();
        }

        tracing::info!(
            "Payment target set: {:?}, min rate {}, min delivery {}, max source {}",
            payment_type,
            min_exchange_rate,
            min_delivery_amount,
            max_source_amount
        );

        Ok(PaymentEstimate {
            estimated_packet_count,
            min_delivery_amount,
            max_source_amount,
            estimated_delivery_low,
            estimated_delivery_high,
        })
    }

    /// Target, once set
    pub fn target(&self) -> Option<PaymentTargetConditions> {
        self.state.lock().target
    }

    /// Reserve source units for a packet
    pub fn add_to_source_in_flight(&self, amount: u64) {
        let mut state = self.state.lock();
        state.source_amount_in_flight = state.source_amount_in_flight.saturating_add(amount);
    }

    /// Release source units of a packet
    pub fn subtract_from_source_in_flight(&self, amount: u64) {
        let mut state = self.state.lock();
        state.source_amount_in_flight = state.source_amount_in_flight.saturating_sub(amount);
    }

    /// Reserve destination units for a packet
    pub fn add_to_destination_in_flight(&self, amount: u64) {
        let mut state = self.state.lock();
        state.destination_amount_in_flight =
            state.destination_amount_in_flight.saturating_add(amount);
    }

    /// Release destination units of a packet
    pub fn subtract_from_destination_in_flight(&self, amount: u64) {
        let mut state = self.state.lock();
        state.destination_amount_in_flight =
            state.destination_amount_in_flight.saturating_sub(amount);
    }

    /// Book fulfilled source units
    pub fn add_amount_sent(&self, amount: u64) {
        let mut state = self.state.lock();
        state.amount_sent = state.amount_sent.saturating_add(amount);
    }

    /// Book fulfilled destination units
    pub fn add_amount_delivered(&self, amount: u64) {
        let mut state = self.state.lock();
        state.amount_delivered = state.amount_delivered.saturating_add(amount);
    }

    /// Spend rounding budget
    pub fn reduce_delivery_shortfall(&self, amount: u64) {
        let mut state = self.state.lock();
        state.available_delivery_shortfall =
            state.available_delivery_shortfall.saturating_sub(amount);
    }

    /// Give rounding budget back, never above its seed
    pub fn increase_delivery_shortfall(&self, amount: u64) {
        let mut state = self.state.lock();
        state.available_delivery_shortfall = state
            .available_delivery_shortfall
            .saturating_add(amount)
            .min(state.max_delivery_shortfall);
    }

    /// Receiver advertised how much it accepts in total
    pub fn update_remote_max(&self, receive_max: u64) {
        let mut state = self.state.lock();
        state.remote_receive_max = Some(receive_max);
        state.check_receive_max();
    }

    /// Receiver broke the protocol
    pub fn set_protocol_violation(&self) {
        let mut state = self.state.lock();
        if !state.protocol_violation {
            tracing::warn!("Receiver protocol violation recorded");
            state.protocol_violation = true;
        }
    }

    /// Consistent copy of all counters
    pub fn snapshot(&self) -> AmountSnapshot {
        let state = self.state.lock();
        AmountSnapshot {
            target: state.target,
            amount_sent: state.amount_sent,
            amount_delivered: state.amount_delivered,
            source_amount_in_flight: state.source_amount_in_flight,
            destination_amount_in_flight: state.destination_amount_in_flight,
            available_delivery_shortfall: state.available_delivery_shortfall,
            remote_receive_max: state.remote_receive_max,
            protocol_violation: state.protocol_violation,
            remote_receive_max_incompatible: state.remote_receive_max_incompatible,
        }
    }
}
