//! Settling one taker/maker fill against the ledger.

use num_bigint::BigInt;
use num_traits::Zero;
use perpclob_liquidation::{LiquidationEngine, accumulate_liquidation_info};
use perpclob_state::{BlockStore, ClobStore};
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::math::{fill_amount_to_quote_quantums, mul_ppm_round};
use perpclob_types::{
    BlockContext, ClobError, ClobEvent, Collaborators, MatchWithOrders, MatchableOrder, Order, Result,
    SubaccountUpdate, UpdateResult, UpdateType,
};

use crate::fills::{FillState, get_updated_order_fill_amount, set_order_fill_amounts_and_pruning};
use crate::trade_prices::record_trade;

/// Outcome of a settled fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledMatch {
    pub taker_update_result: UpdateResult,
    pub maker_update_result: UpdateResult,
    pub fill_quote_quantums: BigInt,
    /// Zero unless the taker is a liquidation order.
    pub insurance_fund_delta: BigInt,
}

/// Settle one fill: move balances, positions, fees and insurance funds,
/// then record trade prices, rewards, stats, events and fill amounts.
///
/// On return `fill.maker_fee` holds the realized maker fee. `fill.taker_fee`
/// holds the taker fee, or the insurance fund delta for a liquidation taker.
///
/// # Errors
/// - [`ClobError::InvalidMatch`] / [`ClobError::ClobPairNotFound`] /
///   [`ClobError::FillAmountNotDivisibleByStepSize`] for a malformed fill
/// - liquidation validation errors for a liquidation taker
/// - [`ClobError::FillExceedsOrderSize`] if either order would be overfilled
/// - [`ClobError::SubaccountUpdateFailed`] if the ledger rejects either side
/// - [`ClobError::InsuranceFundTransferFailed`] if balances moved but the
///   insurance fund payment did not
/// - [`ClobError::FeeTransferFailed`] if balances moved but fees did not
///
/// # Panics
/// Panics unless `ctx` is in deliver mode.
pub fn process_single_match(
    ctx: &BlockContext,
    clob: &mut ClobStore<'_>,
    block: &mut BlockStore<'_>,
    deps: &mut Collaborators<'_>,
    fill: &mut MatchWithOrders,
) -> Result<SettledMatch> {
    ctx.assert_deliver_mode();
    fill.validate()?;
    let clob_pair = clob.must_get_clob_pair(fill.maker.clob_pair_id())?;
    if fill.fill_amount % clob_pair.step_base_quantums != 0 {
        return Err(ClobError::FillAmountNotDivisibleByStepSize {
            fill_amount: fill.fill_amount,
            step: clob_pair.step_base_quantums,
        });
    }
    let perpetual_id = clob_pair.perpetual_id;
    let taker_subaccount = fill.taker.subaccount_id().clone();
    let maker_subaccount = fill.maker.subaccount_id().clone();
    let is_liquidation = fill.taker.is_liquidation();

    let fill_quote = fill_amount_to_quote_quantums(
        fill.maker.subticks,
        fill.fill_amount,
        clob_pair.quantum_conversion_exponent,
    );
    if fill_quote.is_zero() {
        tracing::error!(
            taker = %taker_subaccount,
            maker_order_id = %fill.maker.order_id,
            fill_amount = fill.fill_amount,
            subticks = fill.maker.subticks,
            "Fill has zero quote quantums"
        );
    }

    let mut taker_fee_ppm = deps
        .fee_tiers
        .get_perpetual_fee_ppm(&taker_subaccount.owner, true);
    let mut maker_fee_ppm = deps
        .fee_tiers
        .get_perpetual_fee_ppm(&maker_subaccount.owner, false);

    let insurance_fund_delta = match &fill.taker {
        MatchableOrder::Liquidation(order) => {
            taker_fee_ppm = 0;
            maker_fee_ppm = maker_fee_ppm.max(0);
            let info = block.get_subaccount_liquidation_info(&order.subaccount_id);
            let engine = LiquidationEngine::new(
                &*deps.ledger,
                deps.markets,
                clob.get_liquidations_config(),
            );
            engine.validate_matched_liquidation(
                order,
                &clob_pair,
                fill.fill_amount,
                fill.maker.subticks,
                &info,
            )?
        }
        MatchableOrder::Order(_) => BigInt::zero(),
    };

    let taker_fill_state = match &fill.taker {
        MatchableOrder::Order(order) => {
            Some(get_updated_order_fill_amount(clob, order, fill.fill_amount)?)
        }
        MatchableOrder::Liquidation(_) => None,
    };
    let maker_fill_state = get_updated_order_fill_amount(clob, &fill.maker, fill.fill_amount)?;

    let taker_fee = mul_ppm_round(&fill_quote, taker_fee_ppm, true);
    let maker_fee = mul_ppm_round(&fill_quote, maker_fee_ppm, true);
    if is_liquidation && !taker_fee.is_zero() {
        fault::raise(InvariantViolation::LiquidationTakerFee {
            fee: taker_fee.to_string(),
        });
    }

    // The buyer pays the quote and receives the quantums.
    let fill_quantums = BigInt::from(fill.fill_amount);
    let (taker_settled_quote, taker_perp_delta) = if fill.taker.is_buy() {
        (-&fill_quote, fill_quantums.clone())
    } else {
        (fill_quote.clone(), -&fill_quantums)
    };
    let taker_quote_delta = &taker_settled_quote - &taker_fee - &insurance_fund_delta;
    let maker_quote_delta = -&taker_settled_quote - &maker_fee;
    let maker_perp_delta = -&taker_perp_delta;

    fill.taker_fee = if is_liquidation {
        insurance_fund_delta.clone()
    } else {
        taker_fee.clone()
    };
    fill.maker_fee = maker_fee.clone();

    let updates = [
        SubaccountUpdate::single(
            taker_subaccount.clone(),
            taker_quote_delta.clone(),
            perpetual_id,
            taker_perp_delta.clone(),
        ),
        SubaccountUpdate::single(
            maker_subaccount.clone(),
            maker_quote_delta.clone(),
            perpetual_id,
            maker_perp_delta.clone(),
        ),
    ];
    let (success, results) = deps.ledger.update_subaccounts(&updates, UpdateType::Match)?;
    if is_liquidation && results.first().is_some_and(|r| !r.is_success()) {
        let risk = deps
            .ledger
            .get_net_collateral_and_margin_requirements(&SubaccountUpdate::empty(
                taker_subaccount.clone(),
            ))
            .ok();
        tracing::error!(
            subaccount = %taker_subaccount,
            perpetual_id,
            result = ?results.first(),
            risk = ?risk,
            insurance_fund_delta = %insurance_fund_delta,
            "Liquidated subaccount update failed"
        );
    }
    check_update_results(success, &results, &updates)?;

    deps.ledger
        .transfer_insurance_fund_payments(&insurance_fund_delta, perpetual_id)
        .map_err(|e| ClobError::InsuranceFundTransferFailed {
            perpetual_id,
            delta: insurance_fund_delta.clone(),
            reason: e.to_string(),
        })?;

    let total_fees = &taker_fee + &maker_fee;
    deps.ledger
        .transfer_fees_to_fee_collector(&total_fees, perpetual_id)
        .map_err(|e| ClobError::FeeTransferFailed {
            maker: maker_subaccount.clone(),
            taker: taker_subaccount.clone(),
            fees: total_fees.clone(),
            reason: e.to_string(),
        })?;

    record_trade(block, perpetual_id, fill.maker.subticks);
    deps.rewards.add_reward_shares_for_fill(fill, &fill_quote);
    deps.stats
        .record_fill(&taker_subaccount, &maker_subaccount, &fill_quote);

    deps.emit(ClobEvent::Match {
        taker: taker_subaccount.clone(),
        maker: maker_subaccount.clone(),
        taker_order_id: fill.taker.order_id().cloned(),
        maker_order_id: Some(fill.maker.order_id.clone()),
        perpetual_id,
        fill_amount: fill.fill_amount,
        taker_fee,
        maker_fee,
        taker_quote_delta,
        maker_quote_delta,
        taker_perp_delta,
        maker_perp_delta,
        insurance_fund_delta: insurance_fund_delta.clone(),
        is_liquidation,
        is_deleverage: false,
    });

    if is_liquidation {
        let notional = deps.markets.get_net_notional(perpetual_id, &fill_quantums)?;
        accumulate_liquidation_info(block, &taker_subaccount, &notional, &insurance_fund_delta);
    }

    if let (MatchableOrder::Order(taker), Some(state)) = (&fill.taker, taker_fill_state) {
        persist_fill(clob, deps, taker, state);
    }
    persist_fill(clob, deps, &fill.maker, maker_fill_state);

    Ok(SettledMatch {
        taker_update_result: results[0],
        maker_update_result: results[1],
        fill_quote_quantums: fill_quote,
        insurance_fund_delta,
    })
}

fn persist_fill(clob: &mut ClobStore<'_>, deps: &mut Collaborators<'_>, order: &Order, state: FillState) {
    set_order_fill_amounts_and_pruning(clob, order, state);
    deps.emit(ClobEvent::OrderFillUpdated {
        order_id: order.order_id.clone(),
        total_filled: state.new_total,
    });
}

/// Turn a failed atomic update into an error naming the first failing side.
///
/// A ledger that reports failure with every result successful, or with a
/// result count that does not match the updates, is a fault.
pub(crate) fn check_update_results(
    success: bool,
    results: &[UpdateResult],
    updates: &[SubaccountUpdate],
) -> Result<()> {
    if results.len() != updates.len() {
        fault::raise(InvariantViolation::SilentLedgerFailure {
            detail: format!("{} results for {} updates", results.len(), updates.len()),
        });
    }
    if let Some((result, update)) = results
        .iter()
        .zip(updates)
        .find(|(result, _)| !result.is_success())
    {
        return Err(ClobError::SubaccountUpdateFailed {
            subaccount: update.subaccount_id.clone(),
            result: *result,
        });
    }
    if !success {
        fault::raise(InvariantViolation::SilentLedgerFailure {
            detail: "update_subaccounts failed with every result successful".into(),
        });
    }
    Ok(())
}
