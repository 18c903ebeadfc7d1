//! Events emitted to the indexer collaborator.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{OrderId, PerpetualId, RemovalReason, SubaccountId};

/// Best-effort notifications. Emission never affects settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClobEvent {
    /// A settled fill, including liquidation and deleveraging fills.
    Match {
        taker: SubaccountId,
        maker: SubaccountId,
        /// `None` for liquidation and deleveraging takers.
        taker_order_id: Option<OrderId>,
        /// `None` for deleveraging.
        maker_order_id: Option<OrderId>,
        perpetual_id: PerpetualId,
        fill_amount: u64,
        taker_fee: BigInt,
        maker_fee: BigInt,
        taker_quote_delta: BigInt,
        maker_quote_delta: BigInt,
        taker_perp_delta: BigInt,
        maker_perp_delta: BigInt,
        insurance_fund_delta: BigInt,
        is_liquidation: bool,
        is_deleverage: bool,
    },
    StatefulOrderRemoved {
        order_id: OrderId,
        reason: RemovalReason,
    },
    OrderFillUpdated {
        order_id: OrderId,
        total_filled: u64,
    },
}
