//! Error types for the PerpClob core.
//!
//! All recoverable errors use the `CLOB_ERR_` prefix for easy grepping in
//! logs. Codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Clob pair errors
//! - 3xx: Settlement errors
//! - 4xx: Liquidation errors
//! - 5xx: Deleveraging errors
//! - 6xx: Operations queue errors
//! - 9xx: Collaborator errors
//!
//! Fatal faults are not part of this enum; see [`crate::fault`].

use num_bigint::BigInt;
use thiserror::Error;

use crate::{ClobPairId, OrderId, PerpetualId, SubaccountId, UpdateResult};

/// Central error enum for all recoverable PerpClob failures.
#[derive(Debug, Error)]
pub enum ClobError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The order is not present in the local queue map or durable state.
    #[error("CLOB_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order is malformed against its clob pair.
    #[error("CLOB_ERR_101: Invalid order placement: {reason}")]
    InvalidPlaceOrder { reason: String },

    /// A short-term order expired before the current block.
    #[error("CLOB_ERR_102: GoodTilBlock {good_til_block} is less than the current block height {height}")]
    HeightExceedsGoodTilBlock { good_til_block: u32, height: u32 },

    /// A short-term order lives too far into the future.
    #[error(
        "CLOB_ERR_103: GoodTilBlock {good_til_block} exceeds block height {height} plus ShortBlockWindow {window}"
    )]
    GoodTilBlockExceedsShortBlockWindow {
        good_til_block: u32,
        height: u32,
        window: u32,
    },

    /// A stateful order has already expired.
    #[error(
        "CLOB_ERR_104: GoodTilBlockTime {good_til_block_time} is not after the previous block time {previous_block_time}"
    )]
    TimeExceedsGoodTilBlockTime {
        good_til_block_time: u32,
        previous_block_time: i64,
    },

    /// A stateful order lives past the stateful order time window.
    #[error(
        "CLOB_ERR_105: GoodTilBlockTime {good_til_block_time} exceeds the previous block time plus StatefulOrderTimeWindow ({end_time})"
    )]
    GoodTilBlockTimeExceedsStatefulOrderTimeWindow { good_til_block_time: u32, end_time: i64 },

    /// A stateful order with equal or higher replacement priority already exists.
    #[error("CLOB_ERR_106: Stateful order {order_id} already exists with equal or higher priority")]
    StatefulOrderAlreadyExists { order_id: OrderId },

    /// Removal referenced a stateful order that is not in durable state.
    #[error("CLOB_ERR_107: Stateful order does not exist: {0}")]
    StatefulOrderDoesNotExist(OrderId),

    /// The order's good-til kind does not match its flags.
    #[error("CLOB_ERR_108: Order {order_id} has a good-til value inconsistent with its flags")]
    GoodTilMismatch { order_id: OrderId },

    /// The subaccount reached its stateful order cap.
    #[error("CLOB_ERR_109: Subaccount {subaccount} exceeds the stateful order limit {limit}")]
    StatefulOrderCountExceeded { subaccount: SubaccountId, limit: u32 },

    /// A proposed match failed structural validation.
    #[error("CLOB_ERR_110: Invalid match: {reason}")]
    InvalidMatch { reason: String },

    /// A post-only order cannot be the taker of a match.
    #[error("CLOB_ERR_111: Taker order {0} is post-only")]
    PostOnlyTaker(OrderId),

    /// An immediate-or-cancel or fill-or-kill order cannot rest as a maker.
    #[error("CLOB_ERR_112: Maker order {0} is IOC or FOK")]
    ImmediateMakerOrder(OrderId),

    /// Taker and maker sit on the same side of the book.
    #[error("CLOB_ERR_113: Taker {taker} and maker {maker} are on the same side")]
    SameSideMatch { taker: OrderId, maker: OrderId },

    /// Filling would take an order past its size.
    #[error(
        "CLOB_ERR_114: Fill of {fill} would exceed total quantums {size} of order {order_id} (new total {new_total})"
    )]
    FillExceedsOrderSize {
        order_id: OrderId,
        fill: u64,
        size: u64,
        new_total: u128,
    },

    // =================================================================
    // Clob Pair Errors (2xx)
    // =================================================================
    /// No clob pair with this id.
    #[error("CLOB_ERR_200: Clob pair not found: {0}")]
    ClobPairNotFound(ClobPairId),

    /// The referenced clob pair settles a different perpetual.
    #[error("CLOB_ERR_201: Clob pair {clob_pair_id} settles perpetual {actual}, match references {expected}")]
    ClobPairPerpetualMismatch {
        clob_pair_id: ClobPairId,
        expected: PerpetualId,
        actual: PerpetualId,
    },

    /// The clob pair configuration is invalid.
    #[error("CLOB_ERR_202: Invalid clob pair: {reason}")]
    InvalidClobPair { reason: String },

    /// No clob pair settles this perpetual.
    #[error("CLOB_ERR_203: No clob pair for perpetual {0}")]
    NoClobPairForPerpetual(PerpetualId),

    // =================================================================
    // Settlement Errors (3xx)
    // =================================================================
    /// The fill is not a multiple of the pair's step size.
    #[error("CLOB_ERR_300: Fill amount {fill_amount} is not divisible by step size {step}")]
    FillAmountNotDivisibleByStepSize { fill_amount: u64, step: u64 },

    /// The ledger rejected one side of an atomic update.
    #[error("CLOB_ERR_301: Failed to update subaccount {subaccount}: {result}")]
    SubaccountUpdateFailed {
        subaccount: SubaccountId,
        result: UpdateResult,
    },

    /// Balances already moved but the fee transfer did not go through.
    #[error(
        "CLOB_ERR_302: Subaccounts ({maker}, {taker}) updated, but fee transfer ({fees} quote quantums) to fee-collector failed: {reason}"
    )]
    FeeTransferFailed {
        maker: SubaccountId,
        taker: SubaccountId,
        fees: BigInt,
        reason: String,
    },

    /// Balances already moved but the insurance fund transfer did not go through.
    #[error(
        "CLOB_ERR_303: Subaccounts updated, but insurance fund transfer of {delta} for perpetual {perpetual_id} failed: {reason}"
    )]
    InsuranceFundTransferFailed {
        perpetual_id: PerpetualId,
        delta: BigInt,
        reason: String,
    },

    // =================================================================
    // Liquidation Errors (4xx)
    // =================================================================
    /// The subaccount is not below maintenance margin.
    #[error("CLOB_ERR_400: Subaccount {0} is not liquidatable")]
    SubaccountNotLiquidatable(SubaccountId),

    /// Every position of the subaccount was liquidated this block, or it has none.
    #[error("CLOB_ERR_401: Subaccount {subaccount} has no perpetual positions to liquidate")]
    NoPerpetualPositionsToLiquidate { subaccount: SubaccountId },

    /// The requested delta does not reduce the position.
    #[error(
        "CLOB_ERR_402: Position size delta {delta} is invalid for {subaccount} and perpetual {perpetual_id}, outstanding position size is {position}"
    )]
    InvalidPerpetualPositionSizeDelta {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
        delta: BigInt,
        position: BigInt,
    },

    /// Insurance fund delta requested for a zero fill.
    #[error("CLOB_ERR_403: Fill amount is zero for subaccount {subaccount} and perpetual {perpetual_id}")]
    InvalidQuantumsForInsuranceFundDelta {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
    },

    /// The insurance fund cannot cover the shortfall.
    #[error("CLOB_ERR_404: Insurance fund has insufficient funds for delta {delta} on perpetual {perpetual_id}")]
    InsuranceFundHasInsufficientFunds {
        perpetual_id: PerpetualId,
        delta: BigInt,
    },

    /// The pair was already liquidated in this block.
    #[error(
        "CLOB_ERR_405: Subaccount {subaccount} and perpetual {perpetual_id} have already been liquidated within the current block"
    )]
    SubaccountHasLiquidatedPerpetual {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
    },

    /// The fill exceeds the subaccount's notional block limit.
    #[error(
        "CLOB_ERR_406: Subaccount {subaccount}, perpetual {perpetual_id}: notional liquidated {notional} exceeds max {max}"
    )]
    LiquidationExceedsSubaccountMaxNotionalLiquidated {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
        max: BigInt,
        notional: BigInt,
    },

    /// The fill exceeds the subaccount's insurance-loss block limit.
    #[error(
        "CLOB_ERR_407: Subaccount {subaccount}, perpetual {perpetual_id}: insurance lost {lost} exceeds max {max}"
    )]
    LiquidationExceedsSubaccountMaxInsuranceLost {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
        max: BigInt,
        lost: BigInt,
    },

    /// The proposed liquidation is larger than the recomputed order.
    #[error("CLOB_ERR_408: Liquidation total size {proposed} exceeds recomputed size {max}")]
    InvalidLiquidationOrderTotalSize { proposed: u64, max: u64 },

    /// The proposed liquidation side disagrees with the recomputed order.
    #[error("CLOB_ERR_409: Liquidation side mismatch (proposed is_buy = {proposed_is_buy})")]
    InvalidLiquidationOrderSide { proposed_is_buy: bool },

    /// The liquidations config failed validation.
    #[error("CLOB_ERR_410: Invalid liquidations config: {reason}")]
    InvalidLiquidationsConfig { reason: String },

    // =================================================================
    // Deleveraging Errors (5xx)
    // =================================================================
    /// The subaccount is not eligible for deleveraging.
    #[error("CLOB_ERR_500: Subaccount {subaccount} cannot be deleveraged on perpetual {perpetual_id}")]
    InvalidDeleveragedSubaccount {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
    },

    /// The match's final-settlement flag disagrees with the clob pair status.
    #[error("CLOB_ERR_501: Deleveraging final settlement flag {proposed} does not match expected {expected}")]
    DeleveragingIsFinalSettlementFlagMismatch { proposed: bool, expected: bool },

    /// The liquidated subaccount holds no position in the perpetual.
    #[error("CLOB_ERR_502: Subaccount {subaccount} has no open position in perpetual {perpetual_id}")]
    NoOpenPositionForPerpetual {
        subaccount: SubaccountId,
        perpetual_id: PerpetualId,
    },

    /// The delta does not reduce both sides of a deleveraging pair.
    #[error(
        "CLOB_ERR_503: Deleveraging delta {delta} on perpetual {perpetual_id} is invalid: liquidated {liquidated} holds {liquidated_position}, offsetting {offsetting} holds {offsetting_position}"
    )]
    InvalidDeleveragingDelta {
        liquidated: SubaccountId,
        offsetting: SubaccountId,
        perpetual_id: PerpetualId,
        delta: BigInt,
        liquidated_position: BigInt,
        offsetting_position: BigInt,
    },

    // =================================================================
    // Operations Queue Errors (6xx)
    // =================================================================
    /// An operation in the queue failed; remaining operations were not applied.
    #[error("CLOB_ERR_600: Operation {index} failed at block {block_height}: {source}")]
    OperationFailed {
        block_height: u32,
        index: usize,
        #[source]
        source: Box<ClobError>,
    },

    /// A block summary was read back at a different height.
    #[error("CLOB_ERR_601: Block summary height {actual} does not match current block height {expected}")]
    BlockHeightMismatch { expected: u32, actual: u32 },

    /// No block summary has been written for this block.
    #[error("CLOB_ERR_602: No block summary for block {height}")]
    BlockSummaryMissing { height: u32 },

    // =================================================================
    // Collaborator Errors (9xx)
    // =================================================================
    /// The perpetual-market collaborator does not know this perpetual.
    #[error("CLOB_ERR_900: Perpetual not found: {0}")]
    PerpetualNotFound(PerpetualId),

    /// The ledger collaborator failed.
    #[error("CLOB_ERR_901: Ledger error: {reason}")]
    Ledger { reason: String },

    /// The perpetual-market collaborator failed.
    #[error("CLOB_ERR_902: Market error: {reason}")]
    Market { reason: String },
}

impl ClobError {
    /// Strip any [`ClobError::OperationFailed`] wrapping.
    #[must_use]
    pub fn root(&self) -> &ClobError {
        match self {
            Self::OperationFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convenience alias used throughout PerpClob.
pub type Result<T> = std::result::Result<T, ClobError>;
