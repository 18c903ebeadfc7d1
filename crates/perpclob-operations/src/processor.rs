//! Replaying one block's operations queue against durable state.
//!
//! # Determinism
//!
//! Operations run strictly in queue order, one at a time. The first error
//! stops the queue and is returned wrapped in [`ClobError::OperationFailed`]
//! with the block height and the operation's index. Collections that end up
//! in the block summary are ordered sets, so the summary does not depend on
//! hash iteration order.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigInt;
use num_traits::Zero;
use perpclob_liquidation::{LiquidationEngine, must_record_perpetual_liquidated};
use perpclob_settlement::{
    can_deleverage_subaccount, get_deleveraging_quote_quantums_delta, process_deleveraging,
    process_single_match,
};
use perpclob_state::{BlockStore, ClobStore};
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::math::sign;
use perpclob_types::{
    BlockContext, ClobError, ClobMatch, ClobPairId, Collaborators, DeleveragingFill,
    InternalOperation, LiquidationOrder, MakerFill, MatchWithOrders, MatchableOrder, Order,
    OrderId, PerpetualId, ProcessProposerMatchesEvents, RemovalReason, Result, SubaccountId,
};

use crate::stateful::{perform_stateful_order_validation, remove_stateful_order};
use crate::summary::build_block_summary;

/// Apply a block's operations queue and persist the block summary.
///
/// `placed_stateful_orders` are the long-term and conditional orders placed
/// earlier in this block through [`crate::place_stateful_order`], in
/// placement order. They only feed the summary.
///
/// After the queue, every long-term order whose fill amount reached its size
/// is removed from durable state.
///
/// # Errors
/// - [`ClobError::BlockHeightMismatch`] if the block store was not begun at `ctx.height`
/// - [`ClobError::OperationFailed`] wrapping the first failing operation's error
///
/// # Panics
/// Panics unless `ctx` is in deliver mode, and on any invariant fault raised
/// while applying the queue.
pub fn process_operations(
    ctx: &BlockContext,
    clob: &mut ClobStore<'_>,
    block: &mut BlockStore<'_>,
    deps: &mut Collaborators<'_>,
    placed_stateful_orders: &[Order],
    operations: &[InternalOperation],
) -> Result<ProcessProposerMatchesEvents> {
    ctx.assert_deliver_mode();
    if block.height() != ctx.height {
        return Err(ClobError::BlockHeightMismatch {
            expected: ctx.height,
            actual: block.height(),
        });
    }

    let mut runner = QueueRunner {
        ctx,
        clob,
        block,
        deps,
        short_term_orders: BTreeMap::new(),
        filled: BTreeSet::new(),
        removed: Vec::new(),
    };
    for (index, operation) in operations.iter().enumerate() {
        tracing::debug!(index, kind = operation.kind(), "Processing operation");
        runner
            .run(operation)
            .map_err(|source| ClobError::OperationFailed {
                block_height: ctx.height,
                index,
                source: Box::new(source),
            })?;
    }
    runner.remove_fully_filled_long_term_orders()?;

    let QueueRunner {
        block,
        filled,
        removed,
        ..
    } = runner;
    let summary = build_block_summary(ctx.height, placed_stateful_orders, filled, removed);
    block.set_process_proposer_matches_events(&summary);

    tracing::info!(
        block = ctx.height,
        operations = operations.len(),
        filled = summary.order_ids_filled_in_last_block.len(),
        removed = summary.removed_stateful_order_ids.len(),
        "Processed operations queue"
    );
    Ok(summary)
}

/// Stores and collaborators for one queue, plus what the queue has touched so far.
struct QueueRunner<'r, 'c, 'b, 'd> {
    ctx: &'r BlockContext,
    clob: &'r mut ClobStore<'c>,
    block: &'r mut BlockStore<'b>,
    deps: &'r mut Collaborators<'d>,
    /// Short-term orders placed earlier in this queue.
    short_term_orders: BTreeMap<OrderId, Order>,
    filled: BTreeSet<OrderId>,
    removed: Vec<OrderId>,
}

impl QueueRunner<'_, '_, '_, '_> {
    fn run(&mut self, operation: &InternalOperation) -> Result<()> {
        match operation {
            InternalOperation::Match(ClobMatch::OrdersMatch {
                taker_order_id,
                fills,
            }) => self.orders_match(taker_order_id, fills),
            InternalOperation::Match(ClobMatch::PerpetualLiquidation {
                liquidated,
                clob_pair_id,
                perpetual_id,
                total_size,
                is_buy,
                fills,
            }) => self.perpetual_liquidation(
                liquidated,
                *clob_pair_id,
                *perpetual_id,
                (*total_size, *is_buy),
                fills,
            ),
            InternalOperation::Match(ClobMatch::PerpetualDeleveraging {
                liquidated,
                perpetual_id,
                fills,
                is_final_settlement,
            }) => self.perpetual_deleveraging(liquidated, *perpetual_id, fills, *is_final_settlement),
            InternalOperation::ShortTermOrderPlacement(order) => self.place_short_term(order),
            InternalOperation::OrderRemoval { order_id, reason } => {
                remove_stateful_order(self.ctx, self.clob, self.deps, order_id, *reason)?;
                self.removed.push(order_id.clone());
                Ok(())
            }
            InternalOperation::PreexistingStatefulOrder(order_id) => {
                fault::raise(InvariantViolation::UnsupportedOperation {
                    detail: format!("preexisting stateful order {order_id}"),
                })
            }
        }
    }

    /// A short-term order from this queue, or a stateful order from durable state.
    fn fetch_order(&self, order_id: &OrderId) -> Result<Order> {
        let order = if order_id.is_short_term() {
            self.short_term_orders.get(order_id).cloned()
        } else {
            self.clob
                .get_stateful_order_placement(order_id)
                .map(|placement| placement.order)
        };
        order.ok_or_else(|| ClobError::OrderNotFound(order_id.clone()))
    }

    fn fetch_maker(&self, fill: &MakerFill) -> Result<Order> {
        let maker = self.fetch_order(&fill.maker_order_id)?;
        if maker.is_immediate() {
            return Err(ClobError::ImmediateMakerOrder(maker.order_id));
        }
        Ok(maker)
    }

    fn place_short_term(&mut self, order: &Order) -> Result<()> {
        if !order.order_id.is_short_term() {
            return Err(ClobError::InvalidPlaceOrder {
                reason: format!("{} is not a short-term order", order.order_id),
            });
        }
        perform_stateful_order_validation(self.clob, order, self.ctx.height, false)?;
        self.short_term_orders
            .insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    fn orders_match(&mut self, taker_order_id: &OrderId, fills: &[MakerFill]) -> Result<()> {
        let taker = self.fetch_order(taker_order_id)?;
        if taker.is_post_only() {
            return Err(ClobError::PostOnlyTaker(taker.order_id));
        }

        for fill in fills {
            let maker = self.fetch_maker(fill)?;
            if maker.is_buy() == taker.is_buy() {
                return Err(ClobError::SameSideMatch {
                    taker: taker.order_id.clone(),
                    maker: maker.order_id,
                });
            }
            let mut matched =
                MatchWithOrders::new(MatchableOrder::Order(taker.clone()), maker, fill.fill_amount);
            let settled = process_single_match(self.ctx, self.clob, self.block, self.deps, &mut matched)?;
            tracing::debug!(
                taker = %taker.order_id,
                maker = %matched.maker.order_id,
                fill_amount = fill.fill_amount,
                quote = %settled.fill_quote_quantums,
                "Settled order fill"
            );
            self.filled.insert(taker.order_id.clone());
            self.filled.insert(matched.maker.order_id);
        }
        Ok(())
    }

    fn perpetual_liquidation(
        &mut self,
        liquidated: &SubaccountId,
        clob_pair_id: ClobPairId,
        perpetual_id: PerpetualId,
        (total_size, is_buy): (u64, bool),
        fills: &[MakerFill],
    ) -> Result<()> {
        let expected = {
            let engine = LiquidationEngine::new(
                &*self.deps.ledger,
                self.deps.markets,
                self.clob.get_liquidations_config(),
            );
            engine.ensure_is_liquidatable(liquidated)?;
            let clob_pair = self.clob.must_get_clob_pair(clob_pair_id)?;
            if clob_pair.perpetual_id != perpetual_id {
                return Err(ClobError::ClobPairPerpetualMismatch {
                    clob_pair_id,
                    expected: perpetual_id,
                    actual: clob_pair.perpetual_id,
                });
            }
            let info = self.block.get_subaccount_liquidation_info(liquidated);
            engine.get_liquidation_order_for_perpetual(liquidated, perpetual_id, &clob_pair, &info)?
        };
        if total_size > expected.quantums {
            return Err(ClobError::InvalidLiquidationOrderTotalSize {
                proposed: total_size,
                max: expected.quantums,
            });
        }
        if is_buy != expected.is_buy {
            return Err(ClobError::InvalidLiquidationOrderSide {
                proposed_is_buy: is_buy,
            });
        }
        let filled_total: u128 = fills.iter().map(|f| u128::from(f.fill_amount)).sum();
        if filled_total > u128::from(total_size) {
            return Err(ClobError::InvalidMatch {
                reason: format!("liquidation fills total {filled_total} exceed size {total_size}"),
            });
        }

        let taker = LiquidationOrder {
            quantums: total_size,
            ..expected
        };
        for fill in fills {
            let maker = self.fetch_maker(fill)?;
            let mut matched = MatchWithOrders::new(
                MatchableOrder::Liquidation(taker.clone()),
                maker,
                fill.fill_amount,
            );
            let settled = process_single_match(self.ctx, self.clob, self.block, self.deps, &mut matched)?;
            tracing::debug!(
                subaccount = %liquidated,
                perpetual_id,
                maker = %matched.maker.order_id,
                fill_amount = fill.fill_amount,
                insurance_fund_delta = %settled.insurance_fund_delta,
                "Settled liquidation fill"
            );
            self.filled.insert(matched.maker.order_id);
        }

        must_record_perpetual_liquidated(self.block, liquidated, perpetual_id);
        tracing::info!(
            subaccount = %liquidated,
            perpetual_id,
            total_size,
            fills = fills.len(),
            "Liquidated perpetual position"
        );
        Ok(())
    }

    fn perpetual_deleveraging(
        &mut self,
        liquidated: &SubaccountId,
        perpetual_id: PerpetualId,
        fills: &[DeleveragingFill],
        is_final_settlement: bool,
    ) -> Result<()> {
        let verdict = can_deleverage_subaccount(self.clob, &*self.deps.ledger, liquidated, perpetual_id)?;
        if !verdict.can_deleverage() {
            return Err(ClobError::InvalidDeleveragedSubaccount {
                subaccount: liquidated.clone(),
                perpetual_id,
            });
        }
        if verdict.at_oracle_price != is_final_settlement {
            return Err(ClobError::DeleveragingIsFinalSettlementFlagMismatch {
                proposed: is_final_settlement,
                expected: verdict.at_oracle_price,
            });
        }
        if verdict.at_bankruptcy_price {
            tracing::info!(subaccount = %liquidated, perpetual_id, "Deleveraging subaccount with negative TNC");
        }

        let position = self
            .deps
            .ledger
            .get_subaccount(liquidated)
            .position_size(perpetual_id);
        if position.is_zero() {
            return Err(ClobError::NoOpenPositionForPerpetual {
                subaccount: liquidated.clone(),
                perpetual_id,
            });
        }
        if fills.is_empty() {
            tracing::debug!(subaccount = %liquidated, perpetual_id, "Deleveraging match without fills");
            return Ok(());
        }

        let direction = -BigInt::from(sign(&position));
        for fill in fills {
            let delta_base = &direction * BigInt::from(fill.fill_amount);
            let delta_quote = {
                let engine = LiquidationEngine::new(
                    &*self.deps.ledger,
                    self.deps.markets,
                    self.clob.get_liquidations_config(),
                );
                get_deleveraging_quote_quantums_delta(
                    &engine,
                    perpetual_id,
                    liquidated,
                    &delta_base,
                    is_final_settlement,
                )?
            };
            process_deleveraging(
                self.deps,
                liquidated,
                &fill.offsetting_subaccount_id,
                perpetual_id,
                &delta_base,
                &delta_quote,
            )?;
        }
        Ok(())
    }

    fn remove_fully_filled_long_term_orders(&mut self) -> Result<()> {
        for order_id in self.filled.iter().filter(|id| id.is_long_term()) {
            let Some(placement) = self.clob.get_stateful_order_placement(order_id) else {
                continue;
            };
            let (_, filled, _) = self.clob.get_order_fill_amount(order_id);
            if filled == placement.order.quantums {
                remove_stateful_order(self.ctx, self.clob, self.deps, order_id, RemovalReason::FullyFilled)?;
                self.removed.push(order_id.clone());
            }
        }
        Ok(())
    }
}
