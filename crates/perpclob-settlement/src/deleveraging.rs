//! Deleveraging: closing a position directly against an offsetting
//! subaccount, without an order book.
//!
//! A subaccount with negative total net collateral is deleveraged at its
//! bankruptcy price. A subaccount in a market under final settlement is
//! deleveraged at the oracle price instead.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use perpclob_liquidation::LiquidationEngine;
use perpclob_state::ClobStore;
use perpclob_types::math::{must_u64, sign};
use perpclob_types::{
    ClobError, ClobEvent, Collaborators, Ledger, PerpetualId, Result, SubaccountId,
    SubaccountUpdate, UpdateType,
};

use crate::settle::check_update_results;

/// Which price, if any, a subaccount may be deleveraged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleveragingVerdict {
    pub at_bankruptcy_price: bool,
    pub at_oracle_price: bool,
}

impl DeleveragingVerdict {
    #[must_use]
    pub fn can_deleverage(self) -> bool {
        self.at_bankruptcy_price || self.at_oracle_price
    }
}

/// Negative TNC means bankruptcy-price deleveraging. Otherwise the position
/// can only be closed at the oracle price, and only once its clob pair is in
/// final settlement.
pub fn can_deleverage_subaccount(
    clob: &ClobStore<'_>,
    ledger: &dyn Ledger,
    subaccount: &SubaccountId,
    perpetual_id: PerpetualId,
) -> Result<DeleveragingVerdict> {
    let risk = ledger
        .get_net_collateral_and_margin_requirements(&SubaccountUpdate::empty(subaccount.clone()))?;
    if risk.net_collateral.is_negative() {
        return Ok(DeleveragingVerdict {
            at_bankruptcy_price: true,
            at_oracle_price: false,
        });
    }

    let clob_pair = clob.get_clob_pair_for_perpetual(perpetual_id)?;
    Ok(DeleveragingVerdict {
        at_bankruptcy_price: false,
        at_oracle_price: clob_pair.is_final_settlement(),
    })
}

/// Quote quantums the liquidated subaccount receives for `delta_quantums`.
///
/// In final settlement this is the oracle notional of the closed amount,
/// otherwise the bankruptcy price.
pub fn get_deleveraging_quote_quantums_delta(
    engine: &LiquidationEngine<'_>,
    perpetual_id: PerpetualId,
    subaccount: &SubaccountId,
    delta_quantums: &BigInt,
    is_final_settlement: bool,
) -> Result<BigInt> {
    if is_final_settlement {
        return engine
            .markets()
            .get_net_notional(perpetual_id, &-delta_quantums);
    }
    engine.get_bankruptcy_price_in_quote_quantums(subaccount, perpetual_id, delta_quantums)
}

/// Move `delta_base` of the liquidated position onto the offsetting
/// subaccount, paying `delta_quote` to the liquidated side.
///
/// The delta must reduce both positions: it has the opposite sign of the
/// liquidated position, the same sign as the offsetting one, and is no larger
/// than either.
///
/// # Errors
/// - [`ClobError::InvalidDeleveragingDelta`] if the delta does not reduce both positions
/// - [`ClobError::SubaccountUpdateFailed`] if the ledger rejects either side
pub fn process_deleveraging(
    deps: &mut Collaborators<'_>,
    liquidated: &SubaccountId,
    offsetting: &SubaccountId,
    perpetual_id: PerpetualId,
    delta_base: &BigInt,
    delta_quote: &BigInt,
) -> Result<()> {
    let liquidated_position = deps.ledger.get_subaccount(liquidated).position_size(perpetual_id);
    let offsetting_position = deps.ledger.get_subaccount(offsetting).position_size(perpetual_id);

    let reduces_liquidated = sign(&liquidated_position) * sign(delta_base) == -1
        && liquidated_position.abs() >= delta_base.abs();
    let reduces_offsetting = sign(&offsetting_position) * sign(delta_base) == 1
        && offsetting_position.abs() >= delta_base.abs();
    if !reduces_liquidated || !reduces_offsetting {
        return Err(ClobError::InvalidDeleveragingDelta {
            liquidated: liquidated.clone(),
            offsetting: offsetting.clone(),
            perpetual_id,
            delta: delta_base.clone(),
            liquidated_position,
            offsetting_position,
        });
    }

    let updates = [
        SubaccountUpdate::single(
            liquidated.clone(),
            delta_quote.clone(),
            perpetual_id,
            delta_base.clone(),
        ),
        SubaccountUpdate::single(
            offsetting.clone(),
            -delta_quote,
            perpetual_id,
            -delta_base,
        ),
    ];
    let (success, results) = deps
        .ledger
        .update_subaccounts(&updates, UpdateType::Deleverage)?;
    check_update_results(success, &results, &updates)?;

    tracing::info!(
        %liquidated,
        %offsetting,
        perpetual_id,
        delta_base = %delta_base,
        delta_quote = %delta_quote,
        "Deleveraged position"
    );

    let [liquidated_update, offsetting_update] = updates;
    deps.emit(ClobEvent::Match {
        taker: liquidated.clone(),
        maker: offsetting.clone(),
        taker_order_id: None,
        maker_order_id: None,
        perpetual_id,
        fill_amount: must_u64(&delta_base.abs(), "deleveraging fill amount"),
        taker_fee: BigInt::zero(),
        maker_fee: BigInt::zero(),
        taker_quote_delta: liquidated_update.quote_delta,
        maker_quote_delta: offsetting_update.quote_delta,
        taker_perp_delta: delta_base.clone(),
        maker_perp_delta: -delta_base,
        insurance_fund_delta: BigInt::zero(),
        is_liquidation: false,
        is_deleverage: true,
    });
    Ok(())
}
