//! Order types for the PerpClob core.
//!
//! Orders reach this core already matched. Only the fields that settlement
//! and stateful validation read are modelled here.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ClobError, ClobPairId, OrderId, Result, SubaccountId};

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub fn is_buy(self) -> bool {
        self == Self::Buy
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy { Self::Buy } else { Self::Sell }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Time-in-force of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    Unspecified,
    Ioc,
    PostOnly,
    FillOrKill,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "UNSPECIFIED"),
            Self::Ioc => write!(f, "IOC"),
            Self::PostOnly => write!(f, "POST_ONLY"),
            Self::FillOrKill => write!(f, "FILL_OR_KILL"),
        }
    }
}

/// Expiry of an order. Short-term orders expire by height, stateful orders by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoodTil {
    /// Last block height at which the order may be filled.
    Block(u32),
    /// Unix seconds after which the order expires.
    BlockTime(u32),
}

impl GoodTil {
    #[must_use]
    pub fn value(self) -> u32 {
        match self {
            Self::Block(v) | Self::BlockTime(v) => v,
        }
    }
}

/// Trigger kind for conditional orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionType {
    #[default]
    Unspecified,
    StopLoss,
    TakeProfit,
}

/// SHA-256 identity of a specific order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderHash(pub [u8; 32]);

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A matched order as seen by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub side: OrderSide,
    /// Size in base quantums.
    pub quantums: u64,
    /// Limit price in subticks.
    pub subticks: u64,
    pub good_til: GoodTil,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub client_metadata: u32,
    pub condition_type: ConditionType,
    /// Zero unless `condition_type` is set.
    pub conditional_order_trigger_subticks: u64,
}

impl Order {
    #[must_use]
    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    #[must_use]
    pub fn subaccount_id(&self) -> &SubaccountId {
        &self.order_id.subaccount_id
    }

    #[must_use]
    pub fn clob_pair_id(&self) -> ClobPairId {
        self.order_id.clob_pair_id
    }

    #[must_use]
    pub fn is_post_only(&self) -> bool {
        self.time_in_force == TimeInForce::PostOnly
    }

    /// IOC and FOK orders never rest on the book, so they cannot be makers.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(
            self.time_in_force,
            TimeInForce::Ioc | TimeInForce::FillOrKill
        )
    }

    /// Good-til-block of a short-term order.
    pub fn good_til_block(&self) -> Result<u32> {
        match self.good_til {
            GoodTil::Block(b) if self.order_id.is_short_term() => Ok(b),
            _ => Err(ClobError::GoodTilMismatch {
                order_id: self.order_id.clone(),
            }),
        }
    }

    /// Good-til-block-time of a stateful order.
    pub fn good_til_block_time(&self) -> Result<u32> {
        match self.good_til {
            GoodTil::BlockTime(t) if self.order_id.is_stateful() => Ok(t),
            _ => Err(ClobError::GoodTilMismatch {
                order_id: self.order_id.clone(),
            }),
        }
    }

    /// Deterministic hash over every field of the placement.
    #[must_use]
    pub fn hash(&self) -> OrderHash {
        let id = &self.order_id;
        let mut hasher = Sha256::new();
        hasher.update(b"perpclob:order:v1:");
        hasher.update((id.subaccount_id.owner.len() as u64).to_le_bytes());
        hasher.update(id.subaccount_id.owner.as_bytes());
        hasher.update(id.subaccount_id.number.to_le_bytes());
        hasher.update(id.client_id.to_le_bytes());
        hasher.update(id.order_flags.to_le_bytes());
        hasher.update(id.clob_pair_id.0.to_le_bytes());
        hasher.update([u8::from(self.side.is_buy())]);
        hasher.update(self.quantums.to_le_bytes());
        hasher.update(self.subticks.to_le_bytes());
        match self.good_til {
            GoodTil::Block(b) => {
                hasher.update([0u8]);
                hasher.update(b.to_le_bytes());
            }
            GoodTil::BlockTime(t) => {
                hasher.update([1u8]);
                hasher.update(t.to_le_bytes());
            }
        }
        hasher.update([self.time_in_force as u8]);
        hasher.update([u8::from(self.reduce_only)]);
        hasher.update(self.client_metadata.to_le_bytes());
        hasher.update([self.condition_type as u8]);
        hasher.update(self.conditional_order_trigger_subticks.to_le_bytes());
        OrderHash(hasher.finalize().into())
    }

    /// Replacement priority between two placements of the same order id.
    ///
    /// A later expiry wins; equal expiries fall back to the hash so the
    /// comparison is total.
    #[must_use]
    pub fn replacement_priority(&self, other: &Order) -> Ordering {
        self.good_til
            .value()
            .cmp(&other.good_til.value())
            .then_with(|| self.hash().cmp(&other.hash()))
    }

    /// Whether this placement may replace `existing`.
    #[must_use]
    pub fn can_replace(&self, existing: &Order) -> bool {
        self.replacement_priority(existing) == Ordering::Greater
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order({} {} {}@{} {:?} {})",
            self.order_id, self.side, self.quantums, self.subticks, self.good_til, self.time_in_force
        )
    }
}

/// A stateful order as held in durable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulOrderPlacement {
    pub order: Order,
    /// Height of the block that placed it.
    pub block_height: u32,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// Short-term limit order on `clob_pair_id` expiring at `good_til_block`.
    pub fn dummy_short_term(
        subaccount_id: SubaccountId,
        client_id: u32,
        clob_pair_id: ClobPairId,
        side: OrderSide,
        quantums: u64,
        subticks: u64,
        good_til_block: u32,
    ) -> Self {
        Self {
            order_id: OrderId::new(
                subaccount_id,
                client_id,
                crate::constants::ORDER_FLAGS_SHORT_TERM,
                clob_pair_id,
            ),
            side,
            quantums,
            subticks,
            good_til: GoodTil::Block(good_til_block),
            time_in_force: TimeInForce::Unspecified,
            reduce_only: false,
            client_metadata: 0,
            condition_type: ConditionType::Unspecified,
            conditional_order_trigger_subticks: 0,
        }
    }

    /// Long-term limit order expiring at unix time `good_til_block_time`.
    pub fn dummy_long_term(
        subaccount_id: SubaccountId,
        client_id: u32,
        clob_pair_id: ClobPairId,
        side: OrderSide,
        quantums: u64,
        subticks: u64,
        good_til_block_time: u32,
    ) -> Self {
        Self {
            order_id: OrderId::new(
                subaccount_id,
                client_id,
                crate::constants::ORDER_FLAGS_LONG_TERM,
                clob_pair_id,
            ),
            side,
            quantums,
            subticks,
            good_til: GoodTil::BlockTime(good_til_block_time),
            time_in_force: TimeInForce::Unspecified,
            reduce_only: false,
            client_metadata: 0,
            condition_type: ConditionType::Unspecified,
            conditional_order_trigger_subticks: 0,
        }
    }

    #[must_use]
    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }
}
