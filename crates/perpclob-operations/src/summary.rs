//! The per-block summary of placed, filled, removed and expired order ids.

use std::collections::{BTreeMap, BTreeSet};

use perpclob_types::{Order, OrderHash, OrderId, ProcessProposerMatchesEvents};

/// Build the summary for `block_height`.
///
/// Placed stateful orders keep their placement order. An id placed more than
/// once is listed once, at its final placement, and ids removed in the same
/// block are left out. Filled and removed ids are sorted and deduplicated.
/// Expired ids are filled in at the end of the block.
#[must_use]
pub fn build_block_summary(
    block_height: u32,
    placed_stateful_orders: &[Order],
    filled_order_ids: impl IntoIterator<Item = OrderId>,
    removed_stateful_order_ids: impl IntoIterator<Item = OrderId>,
) -> ProcessProposerMatchesEvents {
    let removed: BTreeSet<OrderId> = removed_stateful_order_ids.into_iter().collect();

    let final_placement: BTreeMap<&OrderId, OrderHash> = placed_stateful_orders
        .iter()
        .map(|order| (&order.order_id, order.hash()))
        .collect();
    let mut listed = BTreeSet::new();
    let placed_stateful_order_ids = placed_stateful_orders
        .iter()
        .filter(|order| !removed.contains(&order.order_id))
        .filter(|order| final_placement.get(&order.order_id) == Some(&order.hash()))
        .filter(|order| listed.insert(order.order_id.clone()))
        .map(|order| order.order_id.clone())
        .collect();

    ProcessProposerMatchesEvents {
        placed_stateful_order_ids,
        order_ids_filled_in_last_block: filled_order_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        removed_stateful_order_ids: removed.into_iter().collect(),
        expired_stateful_order_ids: Vec::new(),
        block_height,
    }
}
