//! Read-only liquidation previews for transaction admission.
//!
//! Previews run against [`Snapshot`] overlays of the durable and per-block
//! stores. The overlays are discarded, so a preview can never leak writes
//! into authoritative state.

use std::collections::BTreeSet;

use perpclob_liquidation::LiquidationEngine;
use perpclob_state::{BlockStore, ClobStore, KvStore, Snapshot};
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::{BlockContext, Collaborators, ExecMode, LiquidationOrder, SubaccountId};

/// Liquidation orders the candidates would receive right now.
///
/// Each candidate is considered once. Candidates that are not liquidatable,
/// or whose order cannot be built, are skipped. The orders come back in
/// processing order: furthest from the oracle price first, then largest
/// quote value, then by order hash.
///
/// # Panics
/// Panics unless `ctx` is in check mode.
#[must_use]
pub fn preview_liquidation_orders(
    ctx: &BlockContext,
    durable: &dyn KvStore,
    block_kv: &dyn KvStore,
    deps: &Collaborators<'_>,
    candidates: &[SubaccountId],
) -> Vec<LiquidationOrder> {
    if ctx.mode != ExecMode::Check {
        fault::raise(InvariantViolation::WrongExecMode {
            expected: ExecMode::Check.as_str(),
            actual: ctx.mode.as_str(),
        });
    }

    let mut clob_view = Snapshot::new(durable);
    let mut block_view = Snapshot::new(block_kv);
    let mut orders = Vec::new();
    {
        let clob = ClobStore::new(&mut clob_view);
        let block = BlockStore::new(&mut block_view);
        let engine =
            LiquidationEngine::new(&*deps.ledger, deps.markets, clob.get_liquidations_config());

        let unique: BTreeSet<&SubaccountId> = candidates.iter().collect();
        for subaccount in unique {
            match engine.maybe_get_liquidation_order(&clob, &block, subaccount) {
                Ok(order) => orders.push(order),
                Err(e) => tracing::debug!(%subaccount, error = %e, "No liquidation order"),
            }
        }
        if let Err(e) = engine.sort_liquidation_orders(&clob, &mut orders) {
            tracing::error!(error = %e, "Failed to sort liquidation orders");
        }
    }
    clob_view.discard();
    block_view.discard();

    tracing::debug!(
        block = ctx.height,
        candidates = candidates.len(),
        orders = orders.len(),
        "Previewed liquidation orders"
    );
    orders
}
