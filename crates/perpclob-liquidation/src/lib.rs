//! # perpclob-liquidation
//!
//! Liquidation engine for the PerpClob core.
//!
//! ## Architecture
//!
//! - [`pricing`]: read-only queries that decide whether a subaccount is
//!   liquidatable and, if so, how much of which position to close and at
//!   what price. [`LiquidationEngine`] bundles the ledger and market
//!   collaborators with the current [`LiquidationsConfig`].
//! - [`block_state`]: per-block bookkeeping of what each subaccount has
//!   already been liquidated for, kept in the block store.
//!
//! Nothing in this crate moves balances. Settlement calls in here to price
//! and validate a liquidation fill, then applies it itself.
//!
//! [`LiquidationsConfig`]: perpclob_types::LiquidationsConfig

pub mod block_state;
pub mod pricing;

pub use block_state::{accumulate_liquidation_info, must_record_perpetual_liquidated};
pub use pricing::{LiquidationEngine, convert_fillable_price_to_subticks};
