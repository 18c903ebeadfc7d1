//! Fatal invariant violations.
//!
//! An [`InvariantViolation`] means upstream validation failed or there is a
//! logic bug; the state transition must not continue. There is no
//! `From<InvariantViolation> for ClobError`, so a fault cannot travel
//! through `?`.
//!
//! The only way to surface a fault is [`raise`], which logs and panics.

use thiserror::Error;

/// An unrecoverable state-machine fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("CLOB_FAULT_01: fillable price {price} is negative")]
    NegativeFillablePrice { price: String },

    #[error("CLOB_FAULT_02: delta maintenance margin {dmmr} is positive")]
    PositiveDeltaMaintenanceMargin { dmmr: String },

    #[error("CLOB_FAULT_03: bounded subticks is zero")]
    ZeroSubticks,

    #[error("CLOB_FAULT_04: subticks {subticks} is not a multiple of subticks per tick {subticks_per_tick}")]
    UnalignedSubticks { subticks: u64, subticks_per_tick: u32 },

    #[error("CLOB_FAULT_05: subaccount {subaccount} already liquidated perpetual {perpetual_id} this block")]
    DuplicateLiquidation { subaccount: String, perpetual_id: u32 },

    #[error("CLOB_FAULT_06: counter {counter} overflowed for subaccount {subaccount}")]
    CounterOverflow { subaccount: String, counter: &'static str },

    #[error("CLOB_FAULT_07: {used} used exceeds block limit {limit} ({what}) for subaccount {subaccount}")]
    BlockLimitExceeded {
        subaccount: String,
        what: &'static str,
        used: u64,
        limit: u64,
    },

    #[error("CLOB_FAULT_08: unsupported operation in queue: {detail}")]
    UnsupportedOperation { detail: String },

    #[error("CLOB_FAULT_09: expected a stateful order, got {order_id}")]
    ExpectedStatefulOrder { order_id: String },

    #[error("CLOB_FAULT_10: stateful order {order_id} does not exist")]
    MissingStatefulOrder { order_id: String },

    #[error("CLOB_FAULT_11: execution mode {actual} where {expected} is required")]
    WrongExecMode {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("CLOB_FAULT_12: liquidation taker charged non-zero taker fee {fee}")]
    LiquidationTakerFee { fee: String },

    #[error("CLOB_FAULT_13: ledger reported failure without an error: {detail}")]
    SilentLedgerFailure { detail: String },

    #[error("CLOB_FAULT_14: corrupt store value under {table}: {detail}")]
    CorruptStore { table: &'static str, detail: String },

    #[error("CLOB_FAULT_15: stateful order count underflow for subaccount {subaccount}")]
    OrderCountUnderflow { subaccount: String },

    #[error("CLOB_FAULT_16: value {value} does not fit in {target}")]
    ConversionOverflow { value: String, target: &'static str },
}

/// Log and panic with a fault. Never returns.
#[track_caller]
pub fn raise(fault: InvariantViolation) -> ! {
    tracing::error!(fault = %fault, "Invariant violation, halting state transition");
    panic!("{fault}");
}
