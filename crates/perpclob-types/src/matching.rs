//! Matched order pairs as handed to settlement.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ClobError, ClobPairId, Order, OrderHash, OrderId, PerpetualId, Result, SubaccountId};

/// Protocol-generated immediate-or-cancel order that closes an undercollateralized position.
///
/// It is never placed on a book and has no fill-amount state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOrder {
    pub subaccount_id: SubaccountId,
    pub clob_pair_id: ClobPairId,
    pub perpetual_id: PerpetualId,
    pub is_buy: bool,
    pub quantums: u64,
    pub subticks: u64,
}

impl LiquidationOrder {
    /// Deterministic hash over every field, used as the last sort key
    /// between liquidation orders.
    #[must_use]
    pub fn hash(&self) -> OrderHash {
        let mut hasher = Sha256::new();
        hasher.update(b"perpclob:liquidation:v1:");
        hasher.update((self.subaccount_id.owner.len() as u64).to_le_bytes());
        hasher.update(self.subaccount_id.owner.as_bytes());
        hasher.update(self.subaccount_id.number.to_le_bytes());
        hasher.update(self.clob_pair_id.0.to_le_bytes());
        hasher.update(self.perpetual_id.to_le_bytes());
        hasher.update([u8::from(self.is_buy)]);
        hasher.update(self.quantums.to_le_bytes());
        hasher.update(self.subticks.to_le_bytes());
        OrderHash(hasher.finalize().into())
    }
}

/// The taker side of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchableOrder {
    Order(Order),
    Liquidation(LiquidationOrder),
}

impl MatchableOrder {
    #[must_use]
    pub fn subaccount_id(&self) -> &SubaccountId {
        match self {
            Self::Order(o) => o.subaccount_id(),
            Self::Liquidation(l) => &l.subaccount_id,
        }
    }

    #[must_use]
    pub fn clob_pair_id(&self) -> ClobPairId {
        match self {
            Self::Order(o) => o.clob_pair_id(),
            Self::Liquidation(l) => l.clob_pair_id,
        }
    }

    #[must_use]
    pub fn is_buy(&self) -> bool {
        match self {
            Self::Order(o) => o.is_buy(),
            Self::Liquidation(l) => l.is_buy,
        }
    }

    #[must_use]
    pub fn quantums(&self) -> u64 {
        match self {
            Self::Order(o) => o.quantums,
            Self::Liquidation(l) => l.quantums,
        }
    }

    #[must_use]
    pub fn subticks(&self) -> u64 {
        match self {
            Self::Order(o) => o.subticks,
            Self::Liquidation(l) => l.subticks,
        }
    }

    #[must_use]
    pub fn is_liquidation(&self) -> bool {
        matches!(self, Self::Liquidation(_))
    }

    /// `None` for liquidation orders.
    #[must_use]
    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Order(o) => Some(&o.order_id),
            Self::Liquidation(_) => None,
        }
    }
}

/// A single taker/maker fill. Fees are filled in by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchWithOrders {
    pub taker: MatchableOrder,
    pub maker: Order,
    pub fill_amount: u64,
    pub taker_fee: BigInt,
    pub maker_fee: BigInt,
}

impl MatchWithOrders {
    #[must_use]
    pub fn new(taker: MatchableOrder, maker: Order, fill_amount: u64) -> Self {
        Self {
            taker,
            maker,
            fill_amount,
            taker_fee: BigInt::default(),
            maker_fee: BigInt::default(),
        }
    }

    /// Structural checks that hold for every fill regardless of state.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(ClobError::InvalidMatch { reason });

        if self.fill_amount == 0 {
            return invalid("fill amount is zero".into());
        }
        if self.taker.is_buy() == self.maker.is_buy() {
            return invalid(format!(
                "taker and maker {} are on the same side",
                self.maker.order_id
            ));
        }
        if self.taker.clob_pair_id() != self.maker.clob_pair_id() {
            return invalid(format!(
                "taker on {} but maker on {}",
                self.taker.clob_pair_id(),
                self.maker.clob_pair_id()
            ));
        }
        if self.taker.subaccount_id() == self.maker.subaccount_id() {
            return invalid(format!(
                "self-trade by subaccount {}",
                self.maker.subaccount_id()
            ));
        }
        if self.fill_amount > self.taker.quantums() {
            return invalid(format!(
                "fill {} exceeds taker size {}",
                self.fill_amount,
                self.taker.quantums()
            ));
        }
        if self.fill_amount > self.maker.quantums {
            return invalid(format!(
                "fill {} exceeds maker size {}",
                self.fill_amount, self.maker.quantums
            ));
        }
        let crosses = if self.taker.is_buy() {
            self.taker.subticks() >= self.maker.subticks
        } else {
            self.taker.subticks() <= self.maker.subticks
        };
        if !crosses {
            return invalid(format!(
                "taker price {} does not cross maker price {}",
                self.taker.subticks(),
                self.maker.subticks
            ));
        }
        Ok(())
    }
}
