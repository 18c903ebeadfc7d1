//! Lowest and highest trade price per perpetual in the current block.
//!
//! Conditional-order triggering reads these at the end of the block, clamped
//! to a band around the oracle price.

use num_bigint::BigInt;
use num_rational::BigRational;
use perpclob_state::{BlockStore, TradePriceBounds};
use perpclob_types::constants::CONDITIONAL_ORDER_TRIGGER_MULTIPLIER;
use perpclob_types::math::rat_mul_ppm;
use perpclob_types::{ClobPair, PerpetualId, PerpetualMarket, Result};

/// Widen the block's bounds for `perpetual_id` to include `subticks`.
pub fn record_trade(block: &mut BlockStore<'_>, perpetual_id: PerpetualId, subticks: u64) {
    let bounds = match block.get_trade_price_bounds(perpetual_id) {
        Some(b) => TradePriceBounds {
            min_subticks: b.min_subticks.min(subticks),
            max_subticks: b.max_subticks.max(subticks),
        },
        None => TradePriceBounds {
            min_subticks: subticks,
            max_subticks: subticks,
        },
    };
    block.set_trade_price_bounds(perpetual_id, bounds);
}

/// `None` if nothing traded on the perpetual this block.
#[must_use]
pub fn get_trade_prices(block: &BlockStore<'_>, perpetual_id: PerpetualId) -> Option<TradePriceBounds> {
    block.get_trade_price_bounds(perpetual_id)
}

/// Trade price bounds of `clob_pair`'s perpetual, each clamped into
/// `oracle ± oracle * min_price_change_ppm * CONDITIONAL_ORDER_TRIGGER_MULTIPLIER`.
///
/// Returns `(min, max)` in subticks, or `None` if nothing traded.
pub fn clamped_trade_prices_for_triggering(
    block: &BlockStore<'_>,
    markets: &dyn PerpetualMarket,
    clob_pair: &ClobPair,
) -> Result<Option<(BigRational, BigRational)>> {
    let Some(bounds) = block.get_trade_price_bounds(clob_pair.perpetual_id) else {
        return Ok(None);
    };

    let perpetual = markets.get_perpetual(clob_pair.perpetual_id)?;
    let oracle = markets.get_oracle_price_subticks(clob_pair)?;
    let range = rat_mul_ppm(&oracle, perpetual.min_price_change_ppm)
        * BigRational::from_integer(BigInt::from(CONDITIONAL_ORDER_TRIGGER_MULTIPLIER));
    let lower = &oracle - &range;
    let upper = &oracle + &range;

    let clamp = |subticks: u64| {
        let price = BigRational::from_integer(BigInt::from(subticks));
        if price < lower {
            lower.clone()
        } else if price > upper {
            upper.clone()
        } else {
            price
        }
    };
    Ok(Some((clamp(bounds.min_subticks), clamp(bounds.max_subticks))))
}
