//! Payment execution
//!
//! `StreamPayer::pay` drives one payment over one connection:
//!
//! 1. Seed the rate from the oracle when the destination asset is known
//! 2. Probe the path for rate, packet limit and receiver asset
//! 3. Fix the payment target against the oracle's minimum rate
//! 4. Run the send loop until the filter chain ends or fails the payment
//! 5. Drain in-flight packets, close the connection, produce the receipt
//!
//! Money packets run concurrently as tokio tasks; their replies are applied
//! to the trackers on the loop's task, so filters never race one another.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_core::{
    AesGcmEncryptor, BincodeCodec, CloseCode, ConnectionState, Frame, IlpReply, Ratio,
    StreamCodec, StreamConnection, StreamEncryptor,
};
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::{
    channel::PacketChannel,
    config::Config,
    filters::{FilterChain, SendState},
    link::Link,
    metrics::PaymentMetrics,
    oracle::ExchangeRateOracle,
    probe,
    trackers::PaymentSharedStateTracker,
    types::{
        PaymentEstimate, PaymentOutcome, PaymentRequest, Receipt, StreamPacketReply,
        StreamPacketRequest,
    },
    Error, Result,
};

/// Source amount the oracle rate is expressed over when seeding the tracker
const RATE_SEED_AMOUNT: u64 = 1_000_000_000;

/// Re-check interval when the chain waits with nothing in flight
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

type InFlight = JoinSet<(StreamPacketRequest, StreamPacketReply)>;

/// Sends STREAM payments over a link
pub struct StreamPayer {
    config: Config,
    link: Arc<dyn Link>,
    oracle: Arc<dyn ExchangeRateOracle>,
    encryptor: Arc<dyn StreamEncryptor>,
    codec: Arc<dyn StreamCodec>,
    metrics: PaymentMetrics,
}

impl std::fmt::Debug for StreamPayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPayer")
            .field("service_name", &self.config.service_name)
            .finish()
    }
}

impl StreamPayer {
    /// Create new payer with AES-GCM encryption and the bincode codec
    pub fn new(
        config: Config,
        link: Arc<dyn Link>,
        oracle: Arc<dyn ExchangeRateOracle>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            link,
            oracle,
            encryptor: Arc::new(AesGcmEncryptor),
            codec: Arc::new(BincodeCodec),
            metrics: PaymentMetrics::new()?,
        })
    }

    /// Replace the packet encryptor
    pub fn with_encryptor(mut self, encryptor: Arc<dyn StreamEncryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// Replace the packet codec
    pub fn with_codec(mut self, codec: Arc<dyn StreamCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Metrics of every payment sent by this payer
    pub fn metrics(&self) -> &PaymentMetrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pay over `connection`.
    ///
    /// Terminal payment states come back as a receipt with a failed
    /// outcome. `Err` is reserved for infrastructure failures: a closed
    /// connection, an unavailable oracle, or a codec that cannot encode.
    /// Packets already in flight are drained and the connection is closed
    /// before an error is returned.
    pub async fn pay(
        &self,
        connection: Arc<StreamConnection>,
        request: PaymentRequest,
    ) -> Result<Receipt> {
        let payment_id = Uuid::now_v7();
        let started_at = Utc::now();
        let start = Instant::now();

        if connection.is_closed() {
            return Err(stream_core::Error::ConnectionClosed.into());
        }
        if connection.state() == ConnectionState::Available {
            connection.transition_state();
        }

        tracing::info!(
            "Payment {} started: {:?} {} {} to {}",
            payment_id,
            request.payment_type,
            request.amount,
            request.source_denomination,
            connection.destination_address()
        );

        let shared = Arc::new(PaymentSharedStateTracker::new(
            Arc::clone(&connection),
            request.source_denomination.clone(),
            request.destination_denomination.clone(),
            &self.config,
        ));
        let channel = PacketChannel::new(
            Arc::clone(&connection),
            Arc::clone(&self.link),
            Arc::clone(&self.encryptor),
            Arc::clone(&self.codec),
            self.config.packet_expiry(),
        );

        let sent = match self.set_target(&channel, &shared, &request).await {
            Ok(_) => self.send_money(&channel, &shared).await,
            Err(Error::Payment(error)) => {
                tracing::warn!("Payment {} could not start: {}", payment_id, error);
                Ok((PaymentOutcome::Failed(error), None))
            }
            Err(e) => Err(e),
        };

        let (outcome, close_request) = match sent {
            Ok(sent) => sent,
            Err(e) => {
                let snapshot = shared.amount().snapshot();
                tracing::error!(
                    "Payment {} aborted after sending {}, delivering {}: {}",
                    payment_id,
                    snapshot.amount_sent,
                    snapshot.amount_delivered,
                    e
                );
                self.close_connection(&channel, None, CloseCode::InternalError, e.to_string())
                    .await;
                return Err(e);
            }
        };

        let (code, message) = match &outcome {
            PaymentOutcome::Completed => (CloseCode::NoError, "Payment complete".to_string()),
            PaymentOutcome::Failed(error) => (CloseCode::ApplicationError, error.to_string()),
        };
        self.close_connection(&channel, close_request, code, message).await;

        let snapshot = shared.amount().snapshot();
        let statistics = shared.statistics();
        let receipt = Receipt {
            payment_id,
            connection_id: connection.id(),
            payment_type: request.payment_type,
            amount_sent: snapshot.amount_sent,
            amount_delivered: snapshot.amount_delivered,
            source_amount_in_flight: snapshot.source_amount_in_flight,
            fulfilled_packets: statistics.fulfill_count(),
            rejected_packets: statistics.reject_count(),
            started_at,
            finished_at: Utc::now(),
            elapsed: start.elapsed(),
            outcome,
        };
        self.metrics.record_payment(&receipt.outcome);

        match receipt.outcome {
            PaymentOutcome::Completed => tracing::info!(
                "Payment {} completed: sent {}, delivered {}, {} packets in {:?}",
                payment_id,
                receipt.amount_sent,
                receipt.amount_delivered,
                receipt.fulfilled_packets,
                receipt.elapsed
            ),
            PaymentOutcome::Failed(error) => tracing::warn!(
                "Payment {} failed: {} (sent {}, delivered {})",
                payment_id,
                error,
                receipt.amount_sent,
                receipt.amount_delivered
            ),
        }
        Ok(receipt)
    }

    async fn set_target(
        &self,
        channel: &PacketChannel,
        shared: &Arc<PaymentSharedStateTracker>,
        request: &PaymentRequest,
    ) -> Result<PaymentEstimate> {
        let source = &request.source_denomination;

        if let Some(destination) = &request.destination_denomination {
            let expected = self
                .oracle
                .get_scaled_exchange_rate(source, destination, Decimal::ZERO)?;
            if let Some(rate) = Ratio::from_decimal(expected) {
                shared
                    .exchange_rate()
                    .initialize_rates(RATE_SEED_AMOUNT, rate.multiply_floor(RATE_SEED_AMOUNT));
            }
        }

        if self.config.probe.enabled {
            probe::probe(channel, shared, &self.config.probe).await?;
        }

        let destination = shared
            .asset_details()
            .destination()
            .or_else(|| request.destination_denomination.clone())
            .ok_or_else(|| Error::Oracle("Destination asset is unknown".to_string()))?;
        let min_rate = self.oracle.get_scaled_exchange_rate(
            source,
            &destination,
            self.config.slippage,
        )?;
        let min_rate = Ratio::from_decimal(min_rate)
            .ok_or_else(|| Error::Oracle(format!("Unusable minimum rate {}", min_rate)))?;

        let estimate = shared.amount().set_payment_target(
            request.payment_type,
            min_rate,
            shared.max_packet().max_packet_amount(),
            request.amount,
        )?;
        tracing::info!(
            "Estimated {} packets, delivering {} to {}",
            estimate.estimated_packet_count,
            estimate.estimated_delivery_low,
            estimate.estimated_delivery_high
        );
        Ok(estimate)
    }

    async fn send_money(
        &self,
        channel: &PacketChannel,
        shared: &Arc<PaymentSharedStateTracker>,
    ) -> Result<(PaymentOutcome, Option<StreamPacketRequest>)> {
        let chain = FilterChain::new(Arc::clone(shared), &self.config);
        let mut in_flight: InFlight = JoinSet::new();

        let result = loop {
            let mut request = StreamPacketRequest::default();
            match chain.next_state(&mut request) {
                SendState::Ready => {
                    let prepare = match channel.prepare(&request, true) {
                        Ok(prepare) => prepare,
                        Err(e) => {
                            tracing::error!("Could not build packet {}: {}", request.sequence, e);
                            break Err(e);
                        }
                    };
                    request.sent_at = Instant::now();
                    chain.on_send(&request);
                    self.metrics.record_packet_sent();
                    tracing::debug!(
                        "Sending packet {}: {} source, at least {} destination",
                        request.sequence,
                        request.source_amount,
                        request.min_destination_amount
                    );

                    let channel = channel.clone();
                    in_flight.spawn(async move {
                        let reply = channel.round_trip(request.sequence, prepare).await;
                        (request, reply)
                    });
                }
                SendState::Wait(delay) => {
                    if in_flight.is_empty() {
                        tokio::time::sleep(delay.unwrap_or(IDLE_POLL_INTERVAL)).await;
                        continue;
                    }
                    match delay {
                        Some(delay) => {
                            tokio::select! {
                                Some(joined) = in_flight.join_next() => self.apply(&chain, joined),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            if let Some(joined) = in_flight.join_next().await {
                                self.apply(&chain, joined);
                            }
                        }
                    }
                }
                SendState::End => break Ok((PaymentOutcome::Completed, None)),
                SendState::Failed(error) => {
                    let close_request = request.is_close.then_some(request);
                    break Ok((PaymentOutcome::Failed(error), close_request));
                }
            }
        };

        if !in_flight.is_empty() {
            tracing::debug!("Draining {} in-flight packets", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            self.apply(&chain, joined);
        }

        result
    }

    fn apply(
        &self,
        chain: &FilterChain,
        joined: std::result::Result<(StreamPacketRequest, StreamPacketReply), JoinError>,
    ) {
        let (request, reply) = match joined {
            Ok(completed) => completed,
            Err(e) => {
                tracing::error!("Packet task failed: {}", e);
                return;
            }
        };

        let rtt = reply.round_trip(request.sent_at);
        match &reply.reply {
            IlpReply::Fulfill(_) => {
                let delivered = reply
                    .destination_amount()
                    .unwrap_or(request.min_destination_amount);
                tracing::debug!(
                    "Packet {} fulfilled: {} delivered {} in {:?}",
                    request.sequence,
                    request.source_amount,
                    delivered,
                    rtt
                );
                self.metrics
                    .record_fulfill(request.source_amount, delivered, rtt);
            }
            IlpReply::Reject(reject) => {
                tracing::debug!(
                    "Packet {} rejected: {} {}",
                    request.sequence,
                    reject.code,
                    reject.message
                );
                self.metrics.record_reject(reject.code, rtt);
            }
        }
        chain.apply(&request, &reply);
    }

    /// Best-effort close: one unfulfillable ConnectionClose packet
    async fn close_connection(
        &self,
        channel: &PacketChannel,
        close_request: Option<StreamPacketRequest>,
        code: CloseCode,
        message: String,
    ) {
        let connection = channel.connection();
        let request = match close_request {
            Some(request) => request,
            None => {
                let sequence = match connection.next_sequence() {
                    Ok(sequence) if connection.sequence_is_safe_for_single_shared_secret(sequence) => {
                        sequence
                    }
                    _ => {
                        connection.close();
                        return;
                    }
                };
                StreamPacketRequest {
                    sequence,
                    is_close: true,
                    frames: vec![Frame::ConnectionClose { code, message }],
                    ..Default::default()
                }
            }
        };

        match channel.prepare(&request, false) {
            Ok(prepare) => {
                let reply = channel.round_trip(request.sequence, prepare).await;
                tracing::debug!(
                    "Close packet {} answered: {:?}",
                    request.sequence,
                    reply.reject().map(|reject| reject.code)
                );
            }
            Err(e) => tracing::warn!("Could not build close packet: {}", e),
        }
        connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;
    use crate::oracle::StaticRateOracle;
    use crate::simulator::SimulatedReceiver;
    use rust_decimal::Decimal;
    use stream_core::{Denomination, IlpAddress, SharedSecret};

    fn oracle() -> Arc<StaticRateOracle> {
        Arc::new(
            StaticRateOracle::new()
                .with_price("USD", Decimal::ONE)
                .with_price("EUR", Decimal::ONE),
        )
    }

    fn connection(secret: SharedSecret) -> Arc<StreamConnection> {
        Arc::new(StreamConnection::new(
            IlpAddress::new("test.sender"),
            IlpAddress::new("test.receiver"),
            secret,
        ))
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error() {
        let secret = SharedSecret::generate();
        let receiver = Arc::new(SimulatedReceiver::new(secret.clone(), Ratio::ONE));
        let payer = StreamPayer::new(Config::default(), receiver, oracle()).unwrap();
        let connection = connection(secret);
        connection.close();

        let result = payer
            .pay(
                connection,
                PaymentRequest::fixed_send(100, Denomination::new("USD", 2)),
            )
            .await;
        assert!(matches!(
            result,
            Err(Error::Core(stream_core::Error::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn test_small_payment_completes() {
        let secret = SharedSecret::generate();
        let receiver = Arc::new(
            SimulatedReceiver::new(secret.clone(), Ratio::ONE)
                .with_denomination(Denomination::new("EUR", 2)),
        );
        let payer =
            StreamPayer::new(Config::default(), Arc::clone(&receiver) as Arc<dyn Link>, oracle())
                .unwrap();
        let connection = connection(secret);

        let receipt = payer
            .pay(
                Arc::clone(&connection),
                PaymentRequest::fixed_send(1_000, Denomination::new("USD", 2)),
            )
            .await
            .unwrap();

        assert!(receipt.is_success(), "{:?}", receipt.outcome);
        assert_eq!(receipt.amount_sent, 1_000);
        assert_eq!(receipt.amount_delivered, 1_000);
        assert_eq!(receipt.source_amount_in_flight, 0);
        assert_eq!(receiver.total_received(), 1_000);
        assert!(connection.is_closed());
        assert_eq!(payer.metrics().amount_sent.get(), 1_000);
    }

    #[tokio::test]
    async fn test_unreachable_receiver_fails_probe() {
        let secret = SharedSecret::generate();
        // Receiver holds a different secret: nothing it says is authentic
        let receiver = Arc::new(SimulatedReceiver::new(SharedSecret::generate(), Ratio::ONE));
        let payer = StreamPayer::new(Config::default(), receiver, oracle()).unwrap();

        let receipt = payer
            .pay(
                connection(secret),
                PaymentRequest::fixed_send(100, Denomination::new("USD", 2)),
            )
            .await
            .unwrap();
        assert_eq!(receipt.error(), Some(PaymentError::RateProbeFailed));
        assert_eq!(receipt.amount_sent, 0);
    }
}
