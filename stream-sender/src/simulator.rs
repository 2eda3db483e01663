//! In-process STREAM receiver behind a simulated path
//!
//! Plays both the connector path and the receiver: it enforces a packet
//! limit (F08), converts amounts at a fixed rate, injects liquidity
//! rejects, and answers with encrypted replies the way a real receiver
//! does. Used by the `stream-pay` demo and the end-to-end tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stream_core::{
    crypto::{fulfillment_and_condition, SharedSecret},
    AesGcmEncryptor, AmountTooLargeData, BincodeCodec, CloseCode, Denomination, ErrorCode, Frame,
    IlpAddress, IlpFulfill, IlpPacketType, IlpPrepare, IlpReject, IlpReply, Ratio, StreamCodec,
    StreamEncryptor, StreamPacket,
};

use crate::{filters::amount::PAYMENT_STREAM_ID, link::Link};

#[derive(Debug, Default)]
struct ReceiverState {
    packets_seen: u64,
    fulfilled: u64,
    total_received: u64,
    closed: bool,
}

/// Receiver end of a connection, reachable through a simulated path
pub struct SimulatedReceiver {
    connector_address: IlpAddress,
    secret: SharedSecret,
    rate: Ratio,
    max_packet_amount: Option<u64>,
    f08_metadata: bool,
    liquidity_reject_every: Option<u64>,
    denomination: Option<Denomination>,
    receive_max: u64,
    latency: Duration,
    close_after: Option<u64>,
    encryptor: Arc<dyn StreamEncryptor>,
    codec: Arc<dyn StreamCodec>,
    state: Mutex<ReceiverState>,
}

impl fmt::Debug for SimulatedReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedReceiver")
            .field("rate", &self.rate)
            .field("max_packet_amount", &self.max_packet_amount)
            .field("denomination", &self.denomination)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl SimulatedReceiver {
    /// Receiver sharing `secret`; the path converts at `rate`
    pub fn new(secret: SharedSecret, rate: Ratio) -> Self {
        Self {
            connector_address: IlpAddress::new("test.connector"),
            secret,
            rate,
            max_packet_amount: None,
            f08_metadata: true,
            liquidity_reject_every: None,
            denomination: None,
            receive_max: u64::MAX,
            latency: Duration::ZERO,
            close_after: None,
            encryptor: Arc::new(AesGcmEncryptor),
            codec: Arc::new(BincodeCodec),
            state: Mutex::new(ReceiverState::default()),
        }
    }

    /// Path limit; `metadata` controls whether F08s report it
    pub fn with_max_packet_amount(mut self, max: u64, metadata: bool) -> Self {
        self.max_packet_amount = Some(max);
        self.f08_metadata = metadata;
        self
    }

    /// Reject every n-th packet with T04
    pub fn with_liquidity_rejects(mut self, every: u64) -> Self {
        self.liquidity_reject_every = Some(every.max(1));
        self
    }

    /// Asset the receiver announces
    pub fn with_denomination(mut self, denomination: Denomination) -> Self {
        self.denomination = Some(denomination);
        self
    }

    /// Total the receiver accepts
    pub fn with_receive_max(mut self, receive_max: u64) -> Self {
        self.receive_max = receive_max;
        self
    }

    /// Delay before each reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Close the connection after this many fulfillments
    pub fn close_after(mut self, fulfillments: u64) -> Self {
        self.close_after = Some(fulfillments);
        self
    }

    /// Destination units credited so far
    pub fn total_received(&self) -> u64 {
        self.state.lock().total_received
    }

    /// Packets fulfilled so far
    pub fn fulfilled_count(&self) -> u64 {
        self.state.lock().fulfilled
    }

    /// Prepares that reached the path
    pub fn packets_seen(&self) -> u64 {
        self.state.lock().packets_seen
    }

    fn connector_reject(&self, code: ErrorCode, message: &str) -> IlpReply {
        IlpReply::Reject(IlpReject::new(code, message).triggered_by(self.connector_address.clone()))
    }

    fn seal(&self, packet: &StreamPacket) -> Option<Vec<u8>> {
        let plaintext = self.codec.encode(packet).ok()?;
        self.encryptor.encrypt(&self.secret, &plaintext).ok()
    }

    fn receiver_reject(
        &self,
        sequence: u64,
        received: u64,
        frames: Vec<Frame>,
        message: &str,
    ) -> IlpReply {
        let packet = StreamPacket::new(IlpPacketType::Reject, sequence, received, frames);
        let reject = IlpReject::new(ErrorCode::F99_APPLICATION_ERROR, message);
        match self.seal(&packet) {
            Some(data) => IlpReply::Reject(reject.with_data(data)),
            None => IlpReply::Reject(reject),
        }
    }

    fn reply_frames(&self, total_received: u64) -> Vec<Frame> {
        let mut frames = vec![Frame::StreamMaxMoney {
            stream_id: PAYMENT_STREAM_ID,
            receive_max: self.receive_max,
            total_received,
        }];
        if let Some(denomination) = &self.denomination {
            frames.push(Frame::ConnectionAssetDetails {
                denomination: denomination.clone(),
            });
        }
        frames
    }

    fn handle(&self, prepare: IlpPrepare) -> IlpReply {
        let mut state = self.state.lock();
        state.packets_seen += 1;

        if let Some(max) = self.max_packet_amount {
            if prepare.amount > max {
                let reject = IlpReject::new(ErrorCode::F08_AMOUNT_TOO_LARGE, "Packet too large")
                    .triggered_by(self.connector_address.clone());
                let reject = if self.f08_metadata {
                    reject.with_data(
                        AmountTooLargeData {
                            received_amount: prepare.amount,
                            maximum_amount: max,
                        }
                        .to_bytes(),
                    )
                } else {
                    reject
                };
                return IlpReply::Reject(reject);
            }
        }

        if let Some(every) = self.liquidity_reject_every {
            if state.packets_seen % every == 0 {
                return self.connector_reject(
                    ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                    "Insufficient liquidity",
                );
            }
        }

        let received = self.rate.multiply_floor(prepare.amount);

        let request = match self
            .encryptor
            .decrypt(&self.secret, &prepare.data)
            .and_then(|plaintext| self.codec.decode(&plaintext))
        {
            Ok(request) => request,
            Err(_) => {
                return IlpReply::Reject(IlpReject::new(
                    ErrorCode::F06_UNEXPECTED_PAYMENT,
                    "Unreadable STREAM packet",
                ))
            }
        };
        let sequence = request.sequence;

        if state.closed || request.has_close_frame() {
            state.closed = true;
            let frames = vec![Frame::ConnectionClose {
                code: CloseCode::NoError,
                message: "Connection closed".to_string(),
            }];
            return self.receiver_reject(sequence, received, frames, "Connection closed");
        }

        let (fulfillment, condition) = fulfillment_and_condition(&self.secret, &prepare.data);
        if condition != prepare.execution_condition {
            // Probe: report what would have arrived
            let frames = self.reply_frames(state.total_received);
            return self.receiver_reject(sequence, received, frames, "Unfulfillable");
        }

        if received < request.prepare_amount {
            let frames = self.reply_frames(state.total_received);
            return self.receiver_reject(sequence, received, frames, "Below minimum");
        }

        if state.total_received.saturating_add(received) > self.receive_max {
            let frames = self.reply_frames(state.total_received);
            return self.receiver_reject(sequence, received, frames, "Exceeds receive max");
        }

        state.total_received += received;
        state.fulfilled += 1;

        let mut frames = self.reply_frames(state.total_received);
        if self.close_after.is_some_and(|limit| state.fulfilled >= limit) {
            state.closed = true;
            frames.push(Frame::ConnectionClose {
                code: CloseCode::NoError,
                message: "Receiver done".to_string(),
            });
        }

        let packet = StreamPacket::new(IlpPacketType::Fulfill, sequence, received, frames);
        match self.seal(&packet) {
            Some(data) => IlpReply::Fulfill(IlpFulfill { fulfillment, data }),
            None => self.connector_reject(ErrorCode::T00_INTERNAL_ERROR, "Reply sealing failed"),
        }
    }
}

#[async_trait]
impl Link for SimulatedReceiver {
    async fn send(&self, prepare: IlpPrepare) -> IlpReply {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.handle(prepare)
    }
}
