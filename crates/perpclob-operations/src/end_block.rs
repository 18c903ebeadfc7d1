//! End-of-block housekeeping.

use perpclob_state::{BlockStore, ClobStore};
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::{BlockContext, ClobError, ProcessProposerMatchesEvents, Result};

/// Prune short-term fill amounts, expire stateful orders and record the block time.
///
/// The block summary written by [`crate::process_operations`] is extended
/// with the expired order ids. A block without an operations queue starts
/// from an empty summary at `ctx.height`.
///
/// # Errors
/// [`ClobError::BlockHeightMismatch`] when the block store or the stored
/// summary belongs to another block.
///
/// # Panics
/// Panics unless `ctx` is in deliver mode, or when the block time is outside
/// the `u32` range of good-til-block-time.
pub fn end_block(
    ctx: &BlockContext,
    clob: &mut ClobStore<'_>,
    block: &mut BlockStore<'_>,
) -> Result<ProcessProposerMatchesEvents> {
    ctx.assert_deliver_mode();
    if block.height() != ctx.height {
        return Err(ClobError::BlockHeightMismatch {
            expected: ctx.height,
            actual: block.height(),
        });
    }

    let mut summary = match block.get_process_proposer_matches_events() {
        Ok(summary) if summary.block_height == ctx.height => summary,
        Ok(summary) => {
            return Err(ClobError::BlockHeightMismatch {
                expected: ctx.height,
                actual: summary.block_height,
            });
        }
        Err(ClobError::BlockSummaryMissing { .. }) => ProcessProposerMatchesEvents {
            block_height: ctx.height,
            ..ProcessProposerMatchesEvents::default()
        },
        Err(e) => return Err(e),
    };

    let pruned = clob.prune_state_fill_amounts_for_short_term_orders(ctx.height);

    let unix_seconds = ctx.block_time.timestamp();
    let block_time = u32::try_from(unix_seconds).unwrap_or_else(|_| {
        fault::raise(InvariantViolation::ConversionOverflow {
            value: unix_seconds.to_string(),
            target: "u32 block time",
        })
    });
    summary.expired_stateful_order_ids = clob.remove_expired_stateful_orders(block_time);
    clob.set_last_committed_block_time(unix_seconds);
    block.set_process_proposer_matches_events(&summary);

    tracing::info!(
        block = ctx.height,
        pruned,
        expired = summary.expired_stateful_order_ids.len(),
        "End of block"
    );
    Ok(summary)
}
