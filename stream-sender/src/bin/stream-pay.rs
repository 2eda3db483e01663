//! Demo payment against an in-process receiver
//!
//! Usage: `stream-pay [config.toml]`. Without a file, configuration comes
//! from `STREAM_*` environment variables. `STREAM_DEMO_AMOUNT` sets the
//! amount to send (USD cents, default 100000).

use anyhow::Context;
use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use stream_core::{Denomination, IlpAddress, Ratio, SharedSecret, StreamConnection};
use stream_sender::{
    Config, PaymentRequest, RetryPolicy, RetryingLink, SimulatedReceiver, StaticRateOracle,
    StreamPayer,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::from_env().context("Invalid STREAM_* environment")?,
    };

    let amount = match std::env::var("STREAM_DEMO_AMOUNT") {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("Invalid STREAM_DEMO_AMOUNT {}", value))?,
        Err(_) => 100_000,
    };

    let usd = Denomination::new("USD", 2);
    let eur = Denomination::new("EUR", 2);
    let oracle = Arc::new(
        StaticRateOracle::new()
            .with_price("USD", Decimal::ONE)
            .with_price("EUR", Decimal::new(108, 2)),
    );

    // Path pays slightly better than the oracle expects
    let path_rate = Ratio::new(93, 100).context("Invalid path rate")?;
    let secret = SharedSecret::generate();
    let receiver = SimulatedReceiver::new(secret.clone(), path_rate)
        .with_denomination(eur)
        .with_max_packet_amount(2_500, false)
        .with_liquidity_rejects(17)
        .with_latency(Duration::from_millis(5));
    let link = Arc::new(RetryingLink::new(receiver, RetryPolicy::from(&config.retry)));

    let connection = Arc::new(StreamConnection::new(
        IlpAddress::new("demo.sender"),
        IlpAddress::new("demo.receiver"),
        secret,
    ));

    info!("🚀 {} sending {} {}", config.service_name, amount, usd);

    let payer = StreamPayer::new(config, link.clone(), oracle)?;
    let receipt = payer
        .pay(connection, PaymentRequest::fixed_send(amount, usd))
        .await?;

    info!(
        "Receiver credited {} over {} fulfilled packets",
        link.inner().total_received(),
        link.inner().fulfilled_count()
    );
    println!("{}", serde_json::to_string_pretty(&receipt)?);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&payer.metrics().registry().gather(), &mut buffer)?;
    println!("{}", String::from_utf8(buffer)?);

    if !receipt.is_success() {
        anyhow::bail!("Payment failed: {:?}", receipt.outcome);
    }
    Ok(())
}
