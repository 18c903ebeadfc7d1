//! Cumulative fill amounts and the short-term pruning schedule.

use perpclob_state::ClobStore;
use perpclob_types::constants::{SHORT_BLOCK_WINDOW, STATEFUL_PRUNABLE_BLOCK_HEIGHT};
use perpclob_types::{ClobError, Order, Result};

/// An order's fill total after a fill, and the height at which its fill
/// amount may be pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillState {
    pub new_total: u64,
    pub prunable_block_height: u32,
}

/// Add `fill` to the order's stored fill amount.
///
/// # Errors
/// [`ClobError::FillExceedsOrderSize`] if the new total would exceed the order's size.
pub fn get_updated_order_fill_amount(
    clob: &ClobStore<'_>,
    order: &Order,
    fill: u64,
) -> Result<FillState> {
    let (_, current, current_prunable) = clob.get_order_fill_amount(&order.order_id);
    let new_total = u128::from(current) + u128::from(fill);
    if new_total > u128::from(order.quantums) {
        return Err(ClobError::FillExceedsOrderSize {
            order_id: order.order_id.clone(),
            fill,
            size: order.quantums,
            new_total,
        });
    }

    let prunable_block_height = if order.order_id.is_stateful() {
        STATEFUL_PRUNABLE_BLOCK_HEIGHT
    } else {
        let expiry = order.good_til_block()?.saturating_add(SHORT_BLOCK_WINDOW);
        if current_prunable > expiry {
            tracing::warn!(
                order_id = %order.order_id,
                current_prunable,
                expiry,
                "Fill for an order with a lower good-til-block than an earlier fill of the same id"
            );
        }
        expiry.max(current_prunable)
    };

    Ok(FillState {
        // Bounded by `order.quantums` above.
        new_total: u64::try_from(new_total).unwrap_or(order.quantums),
        prunable_block_height,
    })
}

/// Persist a [`FillState`]. Short-term orders are also scheduled for pruning.
pub fn set_order_fill_amounts_and_pruning(clob: &mut ClobStore<'_>, order: &Order, state: FillState) {
    if !order.order_id.is_stateful() {
        clob.add_orders_for_pruning(
            state.prunable_block_height,
            std::slice::from_ref(&order.order_id),
        );
    }
    clob.set_order_fill_amount(&order.order_id, state.new_total, state.prunable_block_height);
}
