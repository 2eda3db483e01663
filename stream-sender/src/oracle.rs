//! Exchange rate oracle
//!
//! Rates are "scaled": they convert source base units straight into
//! destination base units, asset scales included, after slippage.

use rust_decimal::Decimal;
use std::collections::HashMap;
use stream_core::Denomination;

use crate::{Error, Result};

/// External rate source
pub trait ExchangeRateOracle: Send + Sync {
    /// Destination base units per source base unit, reduced by `slippage`
    fn get_scaled_exchange_rate(
        &self,
        source: &Denomination,
        destination: &Denomination,
        slippage: Decimal,
    ) -> Result<Decimal>;
}

/// Fixed prices per asset code
#[derive(Debug, Clone, Default)]
pub struct StaticRateOracle {
    /// Price of one unit of each asset in a common reference asset
    prices: HashMap<String, Decimal>,
}

impl StaticRateOracle {
    /// Create new oracle
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price of an asset
    pub fn with_price(mut self, asset_code: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(asset_code.into(), price);
        self
    }

    fn price(&self, asset_code: &str) -> Result<Decimal> {
        match self.prices.get(asset_code) {
            Some(price) if price.is_sign_positive() && !price.is_zero() => Ok(*price),
            Some(price) => Err(Error::Oracle(format!(
                "Invalid price {} for {}",
                price, asset_code
            ))),
            None => Err(Error::Oracle(format!("No price for {}", asset_code))),
        }
    }
}

impl ExchangeRateOracle for StaticRateOracle {
    fn get_scaled_exchange_rate(
        &self,
        source: &Denomination,
        destination: &Denomination,
        slippage: Decimal,
    ) -> Result<Decimal> {
        if slippage < Decimal::ZERO || slippage >= Decimal::ONE {
            return Err(Error::Oracle(format!("Invalid slippage {}", slippage)));
        }

        let source_price = self.price(&source.asset_code)?;
        let destination_price = self.price(&destination.asset_code)?;

        let rate = source_price
            .checked_div(destination_price)
            .ok_or_else(|| Error::Oracle("Rate out of range".to_string()))?;

        // Shift by the difference in asset scales
        let scale_shift = destination.asset_scale as i32 - source.asset_scale as i32;
        let ten = Decimal::TEN;
        let mut scaled = rate;
        for _ in 0..scale_shift.unsigned_abs() {
            scaled = if scale_shift > 0 {
                scaled.checked_mul(ten)
            } else {
                scaled.checked_div(ten)
            }
            .ok_or_else(|| Error::Oracle("Scaled rate out of range".to_string()))?;
        }

        let with_slippage = scaled
            .checked_mul(Decimal::ONE - slippage)
            .ok_or_else(|| Error::Oracle("Scaled rate out of range".to_string()))?;

        tracing::debug!(
            "Oracle rate {} -> {}: {} (scaled {}, slippage {})",
            source.asset_code,
            destination.asset_code,
            rate,
            with_slippage,
            slippage
        );
        Ok(with_slippage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> StaticRateOracle {
        StaticRateOracle::new()
            .with_price("USD", Decimal::ONE)
            .with_price("EUR", Decimal::new(125, 2))
    }

    #[test]
    fn test_same_asset_same_scale() {
        let usd = Denomination::new("USD", 2);
        let rate = oracle()
            .get_scaled_exchange_rate(&usd, &usd, Decimal::ZERO)
            .unwrap();
        assert_eq!(rate, Decimal::ONE);
    }

    #[test]
    fn test_scales_and_slippage() {
        let eur = Denomination::new("EUR", 2);
        let usd = Denomination::new("USD", 6);

        let rate = oracle()
            .get_scaled_exchange_rate(&eur, &usd, Decimal::ZERO)
            .unwrap();
        // 1.25 × 10^4
        assert_eq!(rate, Decimal::new(12_500, 0));

        let rate = oracle()
            .get_scaled_exchange_rate(&eur, &usd, Decimal::new(1, 2))
            .unwrap();
        assert_eq!(rate, Decimal::new(12_375, 0));
    }

    #[test]
    fn test_unknown_asset() {
        let result = oracle().get_scaled_exchange_rate(
            &Denomination::new("XRP", 6),
            &Denomination::new("USD", 2),
            Decimal::ZERO,
        );
        assert!(matches!(result, Err(Error::Oracle(_))));
    }
}
