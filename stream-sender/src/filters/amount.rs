//! Packet sizing and money accounting
//!
//! Sizes each packet as the smallest of what is left to send, the path's
//! packet limit and the room in the congestion window, and sets the minimum
//! the receiver must credit so the exchange rate floor holds per packet.

use std::sync::Arc;
use stream_core::Frame;

use super::{SendFilter, SendState};
use crate::{
    error::PaymentError,
    trackers::PaymentSharedStateTracker,
    types::{PaymentType, StreamPacketReply, StreamPacketRequest},
};

/// Stream carrying the payment
pub const PAYMENT_STREAM_ID: u64 = 1;

/// Decides how much goes in the next packet and books the results
#[derive(Debug)]
pub struct AmountFilter {
    shared: Arc<PaymentSharedStateTracker>,
}

impl AmountFilter {
    /// Create new filter
    pub fn new(shared: Arc<PaymentSharedStateTracker>) -> Self {
        Self { shared }
    }
}

impl SendFilter for AmountFilter {
    fn name(&self) -> &'static str {
        "amount"
    }

    fn next_state(&self, request: &mut StreamPacketRequest) -> SendState {
        let snapshot = self.shared.amount().snapshot();
        if snapshot.protocol_violation {
            return SendState::Failed(PaymentError::ReceiverProtocolViolation);
        }
        if snapshot.remote_receive_max_incompatible {
            return SendState::Failed(PaymentError::IncompatibleReceiveMax);
        }

        // The target is only set once a rate is known
        let Some(target) = snapshot.target else {
            tracing::error!("Send loop started without a payment target");
            return SendState::Failed(PaymentError::RateProbeFailed);
        };

        let in_flight = snapshot.source_amount_in_flight;
        let target_met = if in_flight == 0 {
            SendState::End
        } else {
            SendState::Wait(None)
        };
        let remaining_source = target
            .max_source_amount
            .saturating_sub(snapshot.amount_sent)
            .saturating_sub(in_flight);

        let remaining = match target.payment_type {
            PaymentType::FixedSend => {
                if snapshot.amount_sent >= target.max_source_amount {
                    return target_met;
                }
                if remaining_source == 0 {
                    return SendState::Wait(None);
                }
                remaining_source
            }
            PaymentType::FixedDelivery => {
                if snapshot.amount_delivered >= target.min_delivery_amount {
                    return target_met;
                }
                let remaining_delivery = target
                    .min_delivery_amount
                    .saturating_sub(snapshot.amount_delivered)
                    .saturating_sub(snapshot.destination_amount_in_flight);
                if remaining_delivery == 0 {
                    return SendState::Wait(None);
                }
                if remaining_source == 0 {
                    return if in_flight == 0 {
                        SendState::Failed(PaymentError::InsufficientExchangeRate)
                    } else {
                        SendState::Wait(None)
                    };
                }
                self.shared
                    .exchange_rate()
                    .estimate_source_amount(remaining_delivery)
                    .map(|(_, high)| high)
                    .unwrap_or(remaining_source)
                    .clamp(1, remaining_source)
            }
        };

        let max_packet = self.shared.max_packet().next_max_packet_amount();
        if max_packet == 0 {
            return SendState::Failed(PaymentError::ConnectorError);
        }

        // One packet may always be in flight, whatever the window says
        let window = match self.shared.congestion() {
            Some(congestion) if in_flight > 0 => congestion.available_amount(in_flight),
            _ => u64::MAX,
        };
        if window == 0 {
            return SendState::Wait(None);
        }

        let unthrottled = remaining.min(max_packet);
        let source_amount = unthrottled.min(window);
        let is_final = source_amount == remaining;

        let (low, high) = self
            .shared
            .exchange_rate()
            .estimate_destination_amount(source_amount)
            .unwrap_or((0, 0));
        let mut min_destination = target.min_exchange_rate.multiply_ceil(source_amount);
        let mut delivery_deficit = 0;

        if low < min_destination {
            let shortfall = min_destination - low;
            if is_final && shortfall <= snapshot.available_delivery_shortfall {
                delivery_deficit = shortfall;
                min_destination = low;
            } else if source_amount < unthrottled {
                // Window too tight for a packet that can honor the rate
                return SendState::Wait(None);
            } else {
                tracing::warn!(
                    "Packet of {} would deliver {} at the lower rate bound, below minimum {}",
                    source_amount,
                    low,
                    min_destination
                );
                return SendState::Failed(PaymentError::InsufficientExchangeRate);
            }
        }

        request.source_amount = source_amount;
        request.min_destination_amount = min_destination;
        request.estimated_destination_amount = high;
        request.delivery_deficit = delivery_deficit;
        request.frames.push(Frame::StreamMoney {
            stream_id: PAYMENT_STREAM_ID,
            shares: 1,
        });
        SendState::Ready
    }

    fn on_send(&self, request: &StreamPacketRequest) {
        if request.is_close {
            return;
        }
        let amount = self.shared.amount();
        amount.add_to_source_in_flight(request.source_amount);
        amount.add_to_destination_in_flight(request.min_destination_amount);
        amount.reduce_delivery_shortfall(request.delivery_deficit);
    }

    fn apply(&self, request: &StreamPacketRequest, reply: &StreamPacketReply) {
        if request.is_close {
            return;
        }
        let amount = self.shared.amount();
        amount.subtract_from_source_in_flight(request.source_amount);
        amount.subtract_from_destination_in_flight(request.min_destination_amount);

        if reply.is_fulfill() {
            let delivered = match reply.destination_amount() {
                Some(claimed) => {
                    if claimed < request.min_destination_amount {
                        tracing::warn!(
                            "Receiver fulfilled packet {} claiming {} below minimum {}",
                            request.sequence,
                            claimed,
                            request.min_destination_amount
                        );
                        amount.set_protocol_violation();
                    }
                    claimed
                }
                // The receiver could not have fulfilled below the minimum
                None => request.min_destination_amount,
            };
            amount.add_amount_sent(request.source_amount);
            amount.add_amount_delivered(delivered);

            let required = request
                .min_destination_amount
                .saturating_add(request.delivery_deficit);
            if delivered > required {
                amount.increase_delivery_shortfall(delivered - required);
            }
        } else {
            amount.increase_delivery_shortfall(request.delivery_deficit);
        }

        if let Some(receive_max) = reply
            .stream_packet
            .as_ref()
            .and_then(|packet| packet.receive_max())
        {
            amount.update_remote_max(receive_max);
        }
    }
}
