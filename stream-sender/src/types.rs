//! Payment request, receipt and per-packet value objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use stream_core::{Denomination, Frame, IlpReject, IlpReply, StreamPacket};
use uuid::Uuid;

use crate::error::PaymentError;

/// Which side of the payment is fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    /// Send exactly this source amount
    FixedSend,
    /// Deliver exactly this destination amount
    FixedDelivery,
}

/// Request to pay over an open connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Fixed side
    pub payment_type: PaymentType,

    /// Source units for FixedSend, destination units for FixedDelivery
    pub amount: u64,

    /// Our asset
    pub source_denomination: Denomination,

    /// Receiver asset, if known before probing
    pub destination_denomination: Option<Denomination>,
}

impl PaymentRequest {
    /// Send a fixed source amount
    pub fn fixed_send(amount: u64, source_denomination: Denomination) -> Self {
        Self {
            payment_type: PaymentType::FixedSend,
            amount,
            source_denomination,
            destination_denomination: None,
        }
    }

    /// Deliver a fixed destination amount
    pub fn fixed_delivery(amount: u64, source_denomination: Denomination) -> Self {
        Self {
            payment_type: PaymentType::FixedDelivery,
            amount,
            source_denomination,
            destination_denomination: None,
        }
    }

    /// Declare the receiver's asset up front
    pub fn with_destination(mut self, denomination: Denomination) -> Self {
        self.destination_denomination = Some(denomination);
        self
    }
}

/// Amounts and packet count expected once the target is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEstimate {
    /// Packets needed at the current max packet amount
    pub estimated_packet_count: u64,

    /// Least the receiver must get
    pub min_delivery_amount: u64,

    /// Most we will send
    pub max_source_amount: u64,

    /// Delivery estimate at the lower rate bound
    pub estimated_delivery_low: u64,

    /// Delivery estimate at the upper rate bound
    pub estimated_delivery_high: u64,
}

/// How the payment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// Target met
    Completed,
    /// Terminal error
    Failed(PaymentError),
}

/// Produced at the end of every payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Payment id
    pub payment_id: Uuid,

    /// Connection id
    pub connection_id: Uuid,

    /// Fixed side
    pub payment_type: PaymentType,

    /// Source units fulfilled
    pub amount_sent: u64,

    /// Destination units fulfilled
    pub amount_delivered: u64,

    /// Source units still unresolved (0 after a graceful stop)
    pub source_amount_in_flight: u64,

    /// Fulfilled money packets
    pub fulfilled_packets: u64,

    /// Rejected money packets
    pub rejected_packets: u64,

    /// Start time
    pub started_at: DateTime<Utc>,

    /// End time
    pub finished_at: DateTime<Utc>,

    /// Wall clock duration
    pub elapsed: Duration,

    /// Terminal state
    pub outcome: PaymentOutcome,
}

impl Receipt {
    /// Did the payment meet its target
    pub fn is_success(&self) -> bool {
        self.outcome == PaymentOutcome::Completed
    }

    /// Terminal error, if any
    pub fn error(&self) -> Option<PaymentError> {
        match self.outcome {
            PaymentOutcome::Completed => None,
            PaymentOutcome::Failed(error) => Some(error),
        }
    }
}

/// Packet the filter chain is assembling
#[derive(Debug, Clone)]
pub struct StreamPacketRequest {
    /// Sequence number
    pub sequence: u64,

    /// Prepare amount (source units)
    pub source_amount: u64,

    /// Least the receiver may credit
    pub min_destination_amount: u64,

    /// Upper delivery estimate
    pub estimated_destination_amount: u64,

    /// Shortfall budget spent on this packet
    pub delivery_deficit: u64,

    /// Frames to send
    pub frames: Vec<Frame>,

    /// Connection close packet (zero amount, unfulfillable)
    pub is_close: bool,

    /// When the prepare left
    pub sent_at: Instant,
}

impl Default for StreamPacketRequest {
    fn default() -> Self {
        Self {
            sequence: 0,
            source_amount: 0,
            min_destination_amount: 0,
            estimated_destination_amount: 0,
            delivery_deficit: 0,
            frames: Vec::new(),
            is_close: false,
            sent_at: Instant::now(),
        }
    }
}

/// Outcome of one round trip
#[derive(Debug, Clone)]
pub struct StreamPacketReply {
    /// Reply from the link
    pub reply: IlpReply,

    /// Decrypted reply packet; present only when authentic
    pub stream_packet: Option<StreamPacket>,

    /// When the reply arrived
    pub received_at: Instant,
}

impl StreamPacketReply {
    /// Create new reply
    pub fn new(reply: IlpReply, stream_packet: Option<StreamPacket>) -> Self {
        Self {
            reply,
            stream_packet,
            received_at: Instant::now(),
        }
    }

    /// Did the receiver itself produce this reply
    pub fn is_authentic(&self) -> bool {
        self.stream_packet.is_some()
    }

    /// Was the packet fulfilled
    pub fn is_fulfill(&self) -> bool {
        self.reply.is_fulfill()
    }

    /// Reject, if any
    pub fn reject(&self) -> Option<&IlpReject> {
        self.reply.as_reject()
    }

    /// Amount the receiver claims it got
    pub fn destination_amount(&self) -> Option<u64> {
        self.stream_packet
            .as_ref()
            .map(|packet| packet.prepare_amount)
    }

    /// Round-trip time
    pub fn round_trip(&self, sent_at: Instant) -> Duration {
        self.received_at.saturating_duration_since(sent_at)
    }
}
