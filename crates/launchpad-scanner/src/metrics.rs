//! Token price and market cap derived from trades.
//!
//! `token_price = (quote / 10^18) / (base / 10^6)` and
//! `market_cap = token_price * (token_supply / 10^6)`, both truncated to 18
//! fractional digits.

use bigdecimal::BigDecimal;
use eyre::Result;
use launchpad_data::decimal::{div_truncated, from_units, mul_truncated, METRIC_SCALE};
use launchpad_data::{Amount, Store, Trade};

/// Decimals of the quote asset (the chain's native coin).
pub const QUOTE_DECIMALS: u32 = 18;
/// Decimals of launchpad tokens.
pub const BASE_DECIMALS: u32 = 6;

/// What happened to the owning pool after a trade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricOutcome {
    /// Metrics were written to this many pool rows.
    Updated { rows: usize },
    /// No pool row matches the trade's pool id.
    PoolNotFound,
    /// Quote or base amount is zero, so there is nothing to price.
    NoPricingInput,
}

/// Price per whole token implied by a trade, or `None` if either side is zero.
pub fn token_price(quote_amount: &Amount, base_amount: &Amount) -> Option<BigDecimal> {
    if quote_amount.is_zero() || base_amount.is_zero() {
        return None;
    }
    let quote = from_units(quote_amount.as_u256(), QUOTE_DECIMALS);
    let base = from_units(base_amount.as_u256(), BASE_DECIMALS);
    div_truncated(&quote, &base, METRIC_SCALE)
}

/// Market cap for `token_supply` (in base units) at `price`.
pub fn market_cap(price: &BigDecimal, token_supply: &Amount) -> BigDecimal {
    let supply = from_units(token_supply.as_u256(), BASE_DECIMALS);
    mul_truncated(price, &supply, METRIC_SCALE)
}

/// Recomputes price and market cap on every pool row matching the trade's
/// (chain, pool id). Leaves rows untouched when the trade cannot price them.
///
/// # Errors
/// Returns error if the store lookup or update fails.
pub fn derive_pool_metrics(store: &Store, trade: &Trade) -> Result<MetricOutcome> {
    let Some(price) = token_price(&trade.quote_amount, &trade.base_amount) else {
        return Ok(MetricOutcome::NoPricingInput);
    };

    let pools = store.pools_by_id(trade.chain_id, trade.pool_id)?;
    if pools.is_empty() {
        tracing::debug!(
            pool_id = trade.pool_id,
            tx_hash = %trade.transaction_hash,
            "trade references unknown pool, metrics unchanged"
        );
        return Ok(MetricOutcome::PoolNotFound);
    }

    for pool in &pools {
        let cap = market_cap(&price, &pool.token_supply);
        store.set_pool_metrics(&pool.key(), &price, &cap)?;
    }
    tracing::debug!(pool_id = trade.pool_id, token_price = %price, "pool metrics updated");

    Ok(MetricOutcome::Updated { rows: pools.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_data::decimal::to_plain_string;
    use std::str::FromStr;

    fn amount(s: &str) -> Amount {
        s.parse().expect("test amount should parse")
    }

    #[test]
    fn price_from_quote_and_base() {
        let price = token_price(&amount("1500000000000000000"), &amount("2000000"))
            .expect("amounts are positive");
        assert_eq!(to_plain_string(&price, METRIC_SCALE), "0.750000000000000000");
        assert_eq!(price.as_bigint_and_exponent().1, METRIC_SCALE);
    }

    #[test]
    fn price_truncates_at_eighteen_places() {
        // 1 / 3 with equal unit scaling.
        let price = token_price(&amount("1000000000000000000"), &amount("3000000")).unwrap();
        assert_eq!(to_plain_string(&price, METRIC_SCALE), "0.333333333333333333");
    }

    #[test]
    fn price_survives_amounts_beyond_f64_precision() {
        let price = token_price(
            &amount("123456789012345678901234567890"),
            &amount("1000000"),
        )
        .unwrap();
        assert_eq!(
            price,
            BigDecimal::from_str("123456789012.345678901234567890").unwrap()
        );
    }

    #[test]
    fn zero_amounts_have_no_price() {
        assert!(token_price(&Amount::ZERO, &amount("1")).is_none());
        assert!(token_price(&amount("1"), &Amount::ZERO).is_none());
    }

    #[test]
    fn market_cap_scales_supply() {
        let price = BigDecimal::from_str("0.75").unwrap();
        let cap = market_cap(&price, &amount("1000000000000000"));
        assert_eq!(to_plain_string(&cap, METRIC_SCALE), "750000000.000000000000000000");
    }
}
