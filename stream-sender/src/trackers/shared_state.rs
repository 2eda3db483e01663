//! Trackers of one payment attempt, shared by every in-flight packet

use std::sync::Arc;
use stream_core::{Denomination, StreamConnection};

use crate::{
    config::Config,
    trackers::{
        AmountTracker, AssetDetailsTracker, CongestionController, ExchangeRateTracker,
        MaxPacketAmountTracker, PacingTracker, StatisticsTracker,
    },
};

/// Aggregate of the per-attempt trackers
#[derive(Debug)]
pub struct PaymentSharedStateTracker {
    connection: Arc<StreamConnection>,
    exchange_rate: Arc<ExchangeRateTracker>,
    max_packet: Arc<MaxPacketAmountTracker>,
    pacing: Arc<PacingTracker>,
    congestion: Option<Arc<CongestionController>>,
    amount: Arc<AmountTracker>,
    statistics: Arc<StatisticsTracker>,
    asset_details: Arc<AssetDetailsTracker>,
}

impl PaymentSharedStateTracker {
    /// Create fresh trackers for a connection
    pub fn new(
        connection: Arc<StreamConnection>,
        source: Denomination,
        expected_destination: Option<Denomination>,
        config: &Config,
    ) -> Self {
        let exchange_rate = Arc::new(ExchangeRateTracker::new());
        let congestion = config.congestion.enabled.then(|| {
            Arc::new(CongestionController::new(
                config.congestion.initial_window,
                config.congestion.additive_increase,
            ))
        });

        Self {
            connection,
            amount: Arc::new(AmountTracker::new(Arc::clone(&exchange_rate))),
            exchange_rate,
            max_packet: Arc::new(MaxPacketAmountTracker::new()),
            pacing: Arc::new(PacingTracker::new(config.pacing.clone())),
            congestion,
            statistics: Arc::new(StatisticsTracker::new(config.failure.rolling_window)),
            asset_details: Arc::new(AssetDetailsTracker::new(source, expected_destination)),
        }
    }

    /// Connection
    pub fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }

    /// Exchange rate bounds
    pub fn exchange_rate(&self) -> &Arc<ExchangeRateTracker> {
        &self.exchange_rate
    }

    /// Max packet discovery
    pub fn max_packet(&self) -> &Arc<MaxPacketAmountTracker> {
        &self.max_packet
    }

    /// Pacing
    pub fn pacing(&self) -> &Arc<PacingTracker> {
        &self.pacing
    }

    /// Congestion window, unless disabled
    pub fn congestion(&self) -> Option<&Arc<CongestionController>> {
        self.congestion.as_ref()
    }

    /// Money accounting
    pub fn amount(&self) -> &Arc<AmountTracker> {
        &self.amount
    }

    /// Outcome counters
    pub fn statistics(&self) -> &Arc<StatisticsTracker> {
        &self.statistics
    }

    /// Asset details
    pub fn asset_details(&self) -> &Arc<AssetDetailsTracker> {
        &self.asset_details
    }
}
