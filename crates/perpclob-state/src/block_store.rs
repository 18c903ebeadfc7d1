//! Block-scoped state, emptied at the start of every block.

use perpclob_types::{
    ClobError, PerpetualId, ProcessProposerMatchesEvents, Result, SubaccountId,
    SubaccountLiquidationInfo,
};
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode};
use crate::keys;
use crate::kv::KvStore;

/// Lowest and highest subticks traded on a perpetual this block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePriceBounds {
    pub min_subticks: u64,
    pub max_subticks: u64,
}

/// Liquidation info, trade prices and the block summary for the current block.
pub struct BlockStore<'s> {
    kv: &'s mut dyn KvStore,
}

impl<'s> BlockStore<'s> {
    pub fn new(kv: &'s mut dyn KvStore) -> Self {
        Self { kv }
    }

    /// Drop everything from the previous block and record the new height.
    pub fn begin_block(&mut self, height: u32) {
        let cleared = self.kv.delete_prefix(keys::BLOCK_PREFIX);
        self.kv
            .set(keys::BLOCK_HEIGHT_KEY.to_vec(), encode("block_height", &height));
        tracing::debug!(height, cleared, "Block store reset");
    }

    /// Height passed to the last [`BlockStore::begin_block`], zero if none.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.kv
            .get(keys::BLOCK_HEIGHT_KEY)
            .map_or(0, |bytes| decode("block_height", &bytes))
    }

    // -----------------------------------------------------------------------
    // Liquidation info
    // -----------------------------------------------------------------------

    /// Empty info when the subaccount has not been touched this block.
    #[must_use]
    pub fn get_subaccount_liquidation_info(&self, id: &SubaccountId) -> SubaccountLiquidationInfo {
        self.kv
            .get(&keys::liquidation_info_key(id))
            .map(|bytes| decode("liquidation_info", &bytes))
            .unwrap_or_default()
    }

    pub fn set_subaccount_liquidation_info(
        &mut self,
        id: &SubaccountId,
        info: &SubaccountLiquidationInfo,
    ) {
        self.kv.set(
            keys::liquidation_info_key(id),
            encode("liquidation_info", info),
        );
    }

    // -----------------------------------------------------------------------
    // Trade prices
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn get_trade_price_bounds(&self, perpetual_id: PerpetualId) -> Option<TradePriceBounds> {
        self.kv
            .get(&keys::trade_prices_key(perpetual_id))
            .map(|bytes| decode("trade_prices", &bytes))
    }

    pub fn set_trade_price_bounds(&mut self, perpetual_id: PerpetualId, bounds: TradePriceBounds) {
        self.kv.set(
            keys::trade_prices_key(perpetual_id),
            encode("trade_prices", &bounds),
        );
    }

    // -----------------------------------------------------------------------
    // Block summary
    // -----------------------------------------------------------------------

    pub fn set_process_proposer_matches_events(&mut self, events: &ProcessProposerMatchesEvents) {
        self.kv.set(
            keys::BLOCK_SUMMARY_KEY.to_vec(),
            encode("block_summary", events),
        );
    }

    /// The summary written in this block.
    ///
    /// # Errors
    /// [`ClobError::BlockSummaryMissing`] if none was written and
    /// [`ClobError::BlockHeightMismatch`] if it belongs to another height.
    pub fn get_process_proposer_matches_events(&self) -> Result<ProcessProposerMatchesEvents> {
        let height = self.height();
        let events: ProcessProposerMatchesEvents = self
            .kv
            .get(keys::BLOCK_SUMMARY_KEY)
            .map(|bytes| decode("block_summary", &bytes))
            .ok_or(ClobError::BlockSummaryMissing { height })?;
        if events.block_height != height {
            return Err(ClobError::BlockHeightMismatch {
                expected: height,
                actual: events.block_height,
            });
        }
        Ok(events)
    }
}
