//! Configuration for the STREAM sender

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Lifetime of each prepare packet in milliseconds
    pub packet_expiry_ms: u64,

    /// Fraction below the oracle rate still accepted (0.01 = 1%)
    pub slippage: Decimal,

    /// Packet pacing
    pub pacing: PacingConfig,

    /// AIMD amount window
    pub congestion: CongestionConfig,

    /// Terminal failure thresholds
    pub failure: FailureConfig,

    /// Retry collaborator
    pub retry: RetryConfig,

    /// Rate probe
    pub probe: ProbeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "stream-sender".to_string(),
            packet_expiry_ms: 30_000,
            slippage: Decimal::new(1, 2), // 1%
            pacing: PacingConfig::default(),
            congestion: CongestionConfig::default(),
            failure: FailureConfig::default(),
            retry: RetryConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

/// Pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Starting send rate
    pub initial_packets_per_second: f64,

    /// Floor for the send rate
    pub min_packets_per_second: f64,

    /// Ceiling for the send rate
    pub max_packets_per_second: f64,

    /// Rate increase per fulfilled packet
    pub additive_increase: f64,

    /// Maximum packets in flight
    pub max_in_flight: usize,

    /// RTT estimate before the first reply
    pub initial_rtt_ms: u64,

    /// EWMA weight of the newest RTT sample
    pub rtt_smoothing: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_packets_per_second: 40.0,
            min_packets_per_second: 1.0,
            max_packets_per_second: 200.0,
            additive_increase: 0.5,
            max_in_flight: 20,
            initial_rtt_ms: 200,
            rtt_smoothing: 0.9,
        }
    }
}

/// Congestion window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Apply the window at all
    pub enabled: bool,

    /// Starting window in source units
    pub initial_window: u64,

    /// Window increase per fulfillment in congestion avoidance
    pub additive_increase: u64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_window: 10_000,
            additive_increase: 1_000,
        }
    }
}

/// Failure filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureConfig {
    /// Give up if nothing is fulfilled for this long
    pub idle_timeout_ms: u64,

    /// Final rejects in a row before giving up
    pub max_consecutive_final_rejects: u32,

    /// Outcomes kept for the rolling failure rate
    pub rolling_window: usize,

    /// Outcomes needed before the rolling rate is trusted
    pub min_rolling_samples: usize,

    /// Rolling failure fraction that ends the payment (0.0 - 1.0)
    pub max_failure_rate: f64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            max_consecutive_final_rejects: 1,
            rolling_window: 100,
            min_rolling_samples: 50,
            max_failure_rate: 0.95,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first send
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Cap on any single delay
    pub max_backoff_ms: u64,

    /// Growth factor between attempts
    pub multiplier: f64,

    /// Random spread applied to each delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Rate probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe before sending money
    pub enabled: bool,

    /// Probe amounts, largest first
    pub amounts: Vec<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 10^12 down to 1
            amounts: (0..=12).rev().map(|exp| 10u64.pow(exp)).collect(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(expiry) = env_var("STREAM_PACKET_EXPIRY_MS")? {
            config.packet_expiry_ms = expiry;
        }

        if let Some(slippage) = env_var("STREAM_SLIPPAGE")? {
            config.slippage = slippage;
        }

        if let Some(timeout) = env_var("STREAM_IDLE_TIMEOUT_MS")? {
            config.failure.idle_timeout_ms = timeout;
        }

        if let Some(max_in_flight) = env_var("STREAM_MAX_IN_FLIGHT")? {
            config.pacing.max_in_flight = max_in_flight;
        }

        if let Some(max_pps) = env_var("STREAM_MAX_PACKETS_PER_SECOND")? {
            config.pacing.max_packets_per_second = max_pps;
        }

        if let Some(enabled) = env_var("STREAM_PROBE_ENABLED")? {
            config.probe.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field consistency
    pub fn validate(&self) -> Result<()> {
        if self.slippage < Decimal::ZERO || self.slippage >= Decimal::ONE {
            return Err(Error::Config(format!(
                "slippage must be in [0, 1), got {}",
                self.slippage
            )));
        }

        let pacing = &self.pacing;
        if pacing.min_packets_per_second <= 0.0
            || pacing.min_packets_per_second > pacing.initial_packets_per_second
            || pacing.initial_packets_per_second > pacing.max_packets_per_second
        {
            return Err(Error::Config(
                "pacing rates must satisfy 0 < min <= initial <= max".to_string(),
            ));
        }
        if pacing.max_in_flight == 0 {
            return Err(Error::Config("pacing.max_in_flight must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&pacing.rtt_smoothing) {
            return Err(Error::Config("pacing.rtt_smoothing must be in [0, 1]".to_string()));
        }

        if self.congestion.initial_window == 0 {
            return Err(Error::Config(
                "congestion.initial_window must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.failure.max_failure_rate) {
            return Err(Error::Config(
                "failure.max_failure_rate must be in [0, 1]".to_string(),
            ));
        }
        if self.failure.rolling_window == 0 {
            return Err(Error::Config("failure.rolling_window must be at least 1".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier < 1.0 || !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::Config(
                "retry.multiplier must be >= 1 and retry.jitter in [0, 1)".to_string(),
            ));
        }

        if self.probe.enabled && self.probe.amounts.iter().all(|amount| *amount == 0) {
            return Err(Error::Config("probe.amounts needs a non-zero amount".to_string()));
        }

        Ok(())
    }

    /// Prepare lifetime
    pub fn packet_expiry(&self) -> Duration {
        Duration::from_millis(self.packet_expiry_ms)
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.failure.idle_timeout_ms)
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
