//! Identifiers used throughout PerpClob.
//!
//! All identifiers are plain value types with a total order. The derived
//! `Ord` impls define the canonical sort used for block summaries, so the
//! field order of each struct is significant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{constants, fault, fault::InvariantViolation};

// ---------------------------------------------------------------------------
// SubaccountId
// ---------------------------------------------------------------------------

/// A subaccount is identified by the owning address and a sub-number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubaccountId {
    pub owner: String,
    pub number: u32,
}

impl SubaccountId {
    #[must_use]
    pub fn new(owner: impl Into<String>, number: u32) -> Self {
        Self {
            owner: owner.into(),
            number,
        }
    }
}

impl fmt::Display for SubaccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.number)
    }
}

// ---------------------------------------------------------------------------
// ClobPairId
// ---------------------------------------------------------------------------

/// Identifier of a trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ClobPairId(pub u32);

impl fmt::Display for ClobPairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clob:{}", self.0)
    }
}

/// Perpetual identifiers are bare integers; they only ever index collaborator state.
pub type PerpetualId = u32;

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Identifies an order by `(subaccount, client_id, order_flags, clob_pair_id)`.
///
/// `order_flags` distinguishes short-term orders (pruned by block height)
/// from long-term and conditional orders (stateful, pruned explicitly).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderId {
    pub subaccount_id: SubaccountId,
    pub client_id: u32,
    pub order_flags: u32,
    pub clob_pair_id: ClobPairId,
}

impl OrderId {
    #[must_use]
    pub fn new(
        subaccount_id: SubaccountId,
        client_id: u32,
        order_flags: u32,
        clob_pair_id: ClobPairId,
    ) -> Self {
        Self {
            subaccount_id,
            client_id,
            order_flags,
            clob_pair_id,
        }
    }

    #[must_use]
    pub fn is_short_term(&self) -> bool {
        self.order_flags == constants::ORDER_FLAGS_SHORT_TERM
    }

    #[must_use]
    pub fn is_long_term(&self) -> bool {
        self.order_flags == constants::ORDER_FLAGS_LONG_TERM
    }

    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.order_flags == constants::ORDER_FLAGS_CONDITIONAL
    }

    /// Long-term and conditional orders live in durable state.
    #[must_use]
    pub fn is_stateful(&self) -> bool {
        self.is_long_term() || self.is_conditional()
    }

    /// Panics if this is a short-term order id.
    pub fn must_be_stateful(&self) {
        if !self.is_stateful() {
            fault::raise(InvariantViolation::ExpectedStatefulOrder {
                order_id: self.to_string(),
            });
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}[flags={},{}]",
            self.subaccount_id, self.client_id, self.order_flags, self.clob_pair_id
        )
    }
}
