//! Durable module state.
//!
//! Typed accessors over one [`KvStore`]. Nothing here validates orders or
//! matches; callers do that before writing.

use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::{
    ClobError, ClobPair, ClobPairId, LiquidationsConfig, Order, OrderId, PerpetualId, Result,
    StatefulOrderPlacement, SubaccountId,
};
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode};
use crate::keys;
use crate::kv::KvStore;

/// Fill state of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FillAmountEntry {
    filled: u64,
    prunable_block_height: u32,
}

/// Durable clob state: pairs, config, stateful orders, fill amounts and pruning.
pub struct ClobStore<'s> {
    kv: &'s mut dyn KvStore,
}

impl<'s> ClobStore<'s> {
    pub fn new(kv: &'s mut dyn KvStore) -> Self {
        Self { kv }
    }

    // -----------------------------------------------------------------------
    // Clob pairs
    // -----------------------------------------------------------------------

    /// Write a clob pair and index it by perpetual.
    pub fn set_clob_pair(&mut self, pair: &ClobPair) -> Result<()> {
        pair.validate()?;
        self.kv
            .set(keys::clob_pair_key(pair.id), encode("clob_pair", pair));
        self.kv.set(
            keys::perpetual_clob_pair_key(pair.perpetual_id),
            encode("perpetual_clob_pair", &pair.id),
        );
        Ok(())
    }

    #[must_use]
    pub fn get_clob_pair(&self, id: ClobPairId) -> Option<ClobPair> {
        self.kv
            .get(&keys::clob_pair_key(id))
            .map(|bytes| decode("clob_pair", &bytes))
    }

    pub fn must_get_clob_pair(&self, id: ClobPairId) -> Result<ClobPair> {
        self.get_clob_pair(id).ok_or(ClobError::ClobPairNotFound(id))
    }

    pub fn get_clob_pair_for_perpetual(&self, perpetual_id: PerpetualId) -> Result<ClobPair> {
        let id: ClobPairId = self
            .kv
            .get(&keys::perpetual_clob_pair_key(perpetual_id))
            .map(|bytes| decode("perpetual_clob_pair", &bytes))
            .ok_or(ClobError::NoClobPairForPerpetual(perpetual_id))?;
        self.must_get_clob_pair(id)
    }

    /// All pairs, ascending by id.
    #[must_use]
    pub fn clob_pairs(&self) -> Vec<ClobPair> {
        self.kv
            .prefix_iter(keys::CLOB_PAIR_PREFIX)
            .into_iter()
            .map(|(_, v)| decode("clob_pair", &v))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Liquidations config
    // -----------------------------------------------------------------------

    /// Falls back to the default config when none has been set.
    #[must_use]
    pub fn get_liquidations_config(&self) -> LiquidationsConfig {
        self.kv
            .get(keys::LIQUIDATIONS_CONFIG_KEY)
            .map(|bytes| decode("liquidations_config", &bytes))
            .unwrap_or_default()
    }

    pub fn set_liquidations_config(&mut self, config: &LiquidationsConfig) -> Result<()> {
        config.validate()?;
        self.kv.set(
            keys::LIQUIDATIONS_CONFIG_KEY.to_vec(),
            encode("liquidations_config", config),
        );
        tracing::info!(
            max_liquidation_fee_ppm = config.max_liquidation_fee_ppm,
            "Liquidations config updated"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stateful orders
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn get_stateful_order_placement(&self, id: &OrderId) -> Option<StatefulOrderPlacement> {
        self.kv
            .get(&keys::stateful_placement_key(id))
            .map(|bytes| decode("stateful_placement", &bytes))
    }

    /// Write a placement, its expiration entry and the subaccount's order count.
    ///
    /// Replacing an existing placement moves its expiration entry and leaves
    /// the count unchanged.
    pub fn set_stateful_order_placement(&mut self, order: &Order, block_height: u32) {
        let id = &order.order_id;
        id.must_be_stateful();

        match self.get_stateful_order_placement(id) {
            Some(existing) => {
                self.kv.delete(&keys::stateful_expiration_key(
                    existing.order.good_til.value(),
                    id,
                ));
            }
            None => {
                let count = self.get_stateful_order_count(&id.subaccount_id);
                let next = count.checked_add(1).unwrap_or_else(|| {
                    fault::raise(InvariantViolation::CounterOverflow {
                        subaccount: id.subaccount_id.to_string(),
                        counter: "stateful_order_count",
                    })
                });
                self.set_stateful_order_count(&id.subaccount_id, next);
            }
        }

        let placement = StatefulOrderPlacement {
            order: order.clone(),
            block_height,
        };
        self.kv.set(
            keys::stateful_placement_key(id),
            encode("stateful_placement", &placement),
        );
        self.kv.set(
            keys::stateful_expiration_key(order.good_til.value(), id),
            encode("stateful_expiration", id),
        );
    }

    /// Delete a stateful order with its fill amount and expiration entry.
    ///
    /// # Panics
    /// Panics on a short-term order id or an order that is not in state.
    pub fn must_remove_stateful_order(&mut self, id: &OrderId) {
        id.must_be_stateful();
        let Some(placement) = self.get_stateful_order_placement(id) else {
            fault::raise(InvariantViolation::MissingStatefulOrder {
                order_id: id.to_string(),
            });
        };

        self.kv.delete(&keys::stateful_placement_key(id));
        self.kv.delete(&keys::stateful_expiration_key(
            placement.order.good_til.value(),
            id,
        ));
        self.remove_order_fill_amount(id);

        let count = self.get_stateful_order_count(&id.subaccount_id);
        let Some(next) = count.checked_sub(1) else {
            fault::raise(InvariantViolation::OrderCountUnderflow {
                subaccount: id.subaccount_id.to_string(),
            });
        };
        self.set_stateful_order_count(&id.subaccount_id, next);
    }

    #[must_use]
    pub fn get_stateful_order_count(&self, subaccount: &SubaccountId) -> u32 {
        self.kv
            .get(&keys::stateful_count_key(subaccount))
            .map_or(0, |bytes| decode("stateful_count", &bytes))
    }

    fn set_stateful_order_count(&mut self, subaccount: &SubaccountId, count: u32) {
        let key = keys::stateful_count_key(subaccount);
        if count == 0 {
            self.kv.delete(&key);
        } else {
            self.kv.set(key, encode("stateful_count", &count));
        }
    }

    /// Remove every stateful order whose good-til-block-time is at or before `block_time`.
    ///
    /// Returns the removed ids sorted.
    pub fn remove_expired_stateful_orders(&mut self, block_time: u32) -> Vec<OrderId> {
        let mut expired: Vec<OrderId> = self
            .kv
            .prefix_iter(keys::STATEFUL_EXPIRATION_PREFIX)
            .into_iter()
            .take_while(|(k, _)| keys::expiration_time_of(k).is_some_and(|t| t <= block_time))
            .map(|(_, v)| decode("stateful_expiration", &v))
            .collect();
        expired.sort();
        for id in &expired {
            self.must_remove_stateful_order(id);
        }
        if !expired.is_empty() {
            tracing::info!(block_time, expired = expired.len(), "Removed expired stateful orders");
        }
        expired
    }

    // -----------------------------------------------------------------------
    // Fill amounts and pruning
    // -----------------------------------------------------------------------

    /// `(exists, filled_quantums, prunable_block_height)`.
    #[must_use]
    pub fn get_order_fill_amount(&self, id: &OrderId) -> (bool, u64, u32) {
        match self.kv.get(&keys::fill_amount_key(id)) {
            Some(bytes) => {
                let entry: FillAmountEntry = decode("fill_amount", &bytes);
                (true, entry.filled, entry.prunable_block_height)
            }
            None => (false, 0, 0),
        }
    }

    pub fn set_order_fill_amount(&mut self, id: &OrderId, filled: u64, prunable_block_height: u32) {
        let entry = FillAmountEntry {
            filled,
            prunable_block_height,
        };
        self.kv
            .set(keys::fill_amount_key(id), encode("fill_amount", &entry));
    }

    pub fn remove_order_fill_amount(&mut self, id: &OrderId) {
        self.kv.delete(&keys::fill_amount_key(id));
    }

    /// Schedule `ids` for a fill-amount pruning check at `height`.
    pub fn add_orders_for_pruning(&mut self, height: u32, ids: &[OrderId]) {
        for id in ids {
            self.kv
                .set(keys::pruning_key(height, id), encode("pruning", id));
        }
    }

    /// Drop fill amounts of short-term orders whose pruning height is at or before `height`.
    ///
    /// An order scheduled early but later extended keeps its fill amount
    /// until its stored prunable height is reached. Returns how many fill
    /// amounts were deleted.
    pub fn prune_state_fill_amounts_for_short_term_orders(&mut self, height: u32) -> usize {
        let due: Vec<(Vec<u8>, OrderId)> = self
            .kv
            .prefix_iter(keys::PRUNING_PREFIX)
            .into_iter()
            .take_while(|(k, _)| keys::pruning_height_of(k).is_some_and(|h| h <= height))
            .map(|(k, v)| (k, decode("pruning", &v)))
            .collect();

        let mut pruned = 0;
        for (key, id) in due {
            let (exists, _, prunable) = self.get_order_fill_amount(&id);
            if exists && prunable <= height {
                self.remove_order_fill_amount(&id);
                pruned += 1;
            }
            self.kv.delete(&key);
        }
        if pruned > 0 {
            tracing::debug!(height, pruned, "Pruned short-term fill amounts");
        }
        pruned
    }

    // -----------------------------------------------------------------------
    // Block time
    // -----------------------------------------------------------------------

    /// Unix seconds of the last committed block, zero before the first block.
    #[must_use]
    pub fn get_last_committed_block_time(&self) -> i64 {
        self.kv
            .get(keys::LAST_BLOCK_TIME_KEY)
            .map_or(0, |bytes| decode("last_block_time", &bytes))
    }

    pub fn set_last_committed_block_time(&mut self, unix_seconds: i64) {
        self.kv.set(
            keys::LAST_BLOCK_TIME_KEY.to_vec(),
            encode("last_block_time", &unix_seconds),
        );
    }
}
