//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring payments. Each payer owns its own
//! registry, so several payers can live in one process.
//!
//! # Metrics
//!
//! - `stream_packets_sent_total` - Money packets put on the link
//! - `stream_packets_fulfilled_total` - Money packets fulfilled
//! - `stream_packets_rejected_total{code}` - Money packets rejected, by ILP code
//! - `stream_packet_rtt_seconds` - Histogram of packet round trips
//! - `stream_amount_sent_total` - Source units fulfilled
//! - `stream_amount_delivered_total` - Destination units fulfilled
//! - `stream_payments_total{outcome}` - Finished payments, by outcome
//! - `stream_packets_in_flight` - Unanswered money packets

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;
use stream_core::ErrorCode;

use crate::types::PaymentOutcome;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct PaymentMetrics {
    /// Money packets sent
    pub packets_sent: IntCounter,

    /// Money packets fulfilled
    pub packets_fulfilled: IntCounter,

    /// Money packets rejected by code
    pub packets_rejected: IntCounterVec,

    /// Round-trip histogram
    pub packet_rtt: Histogram,

    /// Source units fulfilled
    pub amount_sent: IntCounter,

    /// Destination units fulfilled
    pub amount_delivered: IntCounter,

    /// Finished payments by outcome
    pub payments: IntCounterVec,

    /// Unanswered money packets
    pub in_flight: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl PaymentMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let packets_sent = IntCounter::new(
            "stream_packets_sent_total",
            "Money packets put on the link",
        )?;
        registry.register(Box::new(packets_sent.clone()))?;

        let packets_fulfilled = IntCounter::new(
            "stream_packets_fulfilled_total",
            "Money packets fulfilled",
        )?;
        registry.register(Box::new(packets_fulfilled.clone()))?;

        let packets_rejected = IntCounterVec::new(
            Opts::new("stream_packets_rejected_total", "Money packets rejected"),
            &["code"],
        )?;
        registry.register(Box::new(packets_rejected.clone()))?;

        let packet_rtt = Histogram::with_opts(
            HistogramOpts::new("stream_packet_rtt_seconds", "Histogram of packet round trips")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(packet_rtt.clone()))?;

        let amount_sent = IntCounter::new(
            "stream_amount_sent_total",
            "Source units fulfilled",
        )?;
        registry.register(Box::new(amount_sent.clone()))?;

        let amount_delivered = IntCounter::new(
            "stream_amount_delivered_total",
            "Destination units fulfilled",
        )?;
        registry.register(Box::new(amount_delivered.clone()))?;

        let payments = IntCounterVec::new(
            Opts::new("stream_payments_total", "Finished payments"),
            &["outcome"],
        )?;
        registry.register(Box::new(payments.clone()))?;

        let in_flight = IntGauge::new("stream_packets_in_flight", "Unanswered money packets")?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            packets_sent,
            packets_fulfilled,
            packets_rejected,
            packet_rtt,
            amount_sent,
            amount_delivered,
            payments,
            in_flight,
            registry,
        })
    }

    /// Record a money packet leaving
    pub fn record_packet_sent(&self) {
        self.packets_sent.inc();
        self.in_flight.inc();
    }

    /// Record a fulfilled money packet
    pub fn record_fulfill(&self, source_amount: u64, destination_amount: u64, rtt: Duration) {
        self.in_flight.dec();
        self.packets_fulfilled.inc();
        self.amount_sent.inc_by(source_amount);
        self.amount_delivered.inc_by(destination_amount);
        self.packet_rtt.observe(rtt.as_secs_f64());
    }

    /// Record a rejected money packet
    pub fn record_reject(&self, code: ErrorCode, rtt: Duration) {
        self.in_flight.dec();
        self.packets_rejected
            .with_label_values(&[&code.to_string()])
            .inc();
        self.packet_rtt.observe(rtt.as_secs_f64());
    }

    /// Record a finished payment
    pub fn record_payment(&self, outcome: &PaymentOutcome) {
        let label = match outcome {
            PaymentOutcome::Completed => "completed".to_string(),
            PaymentOutcome::Failed(error) => format!("{:?}", error),
        };
        self.payments.with_label_values(&[&label]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;

    #[test]
    fn test_metrics_creation() {
        let metrics = PaymentMetrics::new().unwrap();
        assert_eq!(metrics.packets_sent.get(), 0);
        assert_eq!(metrics.in_flight.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = PaymentMetrics::new().unwrap();
        let second = PaymentMetrics::new().unwrap();
        first.record_packet_sent();
        assert_eq!(first.packets_sent.get(), 1);
        assert_eq!(second.packets_sent.get(), 0);
    }

    #[test]
    fn test_packet_lifecycle() {
        let metrics = PaymentMetrics::new().unwrap();
        metrics.record_packet_sent();
        metrics.record_packet_sent();
        metrics.record_fulfill(100, 95, Duration::from_millis(20));
        metrics.record_reject(ErrorCode::T04_INSUFFICIENT_LIQUIDITY, Duration::from_millis(5));

        assert_eq!(metrics.in_flight.get(), 0);
        assert_eq!(metrics.amount_sent.get(), 100);
        assert_eq!(metrics.amount_delivered.get(), 95);
        assert_eq!(
            metrics.packets_rejected.with_label_values(&["T04"]).get(),
            1
        );
    }

    #[test]
    fn test_record_payment() {
        let metrics = PaymentMetrics::new().unwrap();
        metrics.record_payment(&PaymentOutcome::Completed);
        metrics.record_payment(&PaymentOutcome::Failed(PaymentError::IdleTimeout));
        assert_eq!(metrics.payments.with_label_values(&["completed"]).get(), 1);
        assert_eq!(metrics.payments.with_label_values(&["IdleTimeout"]).get(), 1);
        assert!(!metrics.registry().gather().is_empty());
    }
}
