//! The operations queue proposed for a block.

use serde::{Deserialize, Serialize};

use crate::{ClobPairId, Order, OrderId, PerpetualId, SubaccountId};

/// One maker's share of an order match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerFill {
    pub maker_order_id: OrderId,
    pub fill_amount: u64,
}

/// One counterparty's share of a deleveraging match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleveragingFill {
    pub offsetting_subaccount_id: SubaccountId,
    pub fill_amount: u64,
}

/// A proposed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClobMatch {
    /// A regular taker order against one or more makers.
    OrdersMatch {
        taker_order_id: OrderId,
        fills: Vec<MakerFill>,
    },
    /// A protocol liquidation order against one or more makers.
    PerpetualLiquidation {
        liquidated: SubaccountId,
        clob_pair_id: ClobPairId,
        perpetual_id: PerpetualId,
        total_size: u64,
        is_buy: bool,
        fills: Vec<MakerFill>,
    },
    /// Offsetting a position directly against other subaccounts.
    PerpetualDeleveraging {
        liquidated: SubaccountId,
        perpetual_id: PerpetualId,
        fills: Vec<DeleveragingFill>,
        is_final_settlement: bool,
    },
}

/// Why a stateful order is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalReason {
    Unspecified,
    Undercollateralized,
    InvalidReduceOnly,
    PostOnlyWouldCrossMakerOrder,
    InvalidSelfTrade,
    ConditionalFokCouldNotBeFullyFilled,
    ConditionalIocWouldRestOnBook,
    FullyFilled,
    ViolatesIsolatedSubaccountConstraints,
}

/// One entry of the operations queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalOperation {
    Match(ClobMatch),
    ShortTermOrderPlacement(Order),
    OrderRemoval {
        order_id: OrderId,
        reason: RemovalReason,
    },
    /// Only the book may reference preexisting stateful orders; never valid here.
    PreexistingStatefulOrder(OrderId),
}

impl InternalOperation {
    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Match(ClobMatch::OrdersMatch { .. }) => "orders_match",
            Self::Match(ClobMatch::PerpetualLiquidation { .. }) => "perpetual_liquidation",
            Self::Match(ClobMatch::PerpetualDeleveraging { .. }) => "perpetual_deleveraging",
            Self::ShortTermOrderPlacement(_) => "short_term_order_placement",
            Self::OrderRemoval { .. } => "order_removal",
            Self::PreexistingStatefulOrder(_) => "preexisting_stateful_order",
        }
    }
}
