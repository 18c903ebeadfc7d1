//! # perpclob-types
//!
//! Shared types, errors, and collaborator traits for the **PerpClob**
//! settlement and liquidation core.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`SubaccountId`], [`OrderId`], [`ClobPairId`], [`PerpetualId`]
//! - **Order model**: [`Order`], [`OrderSide`], [`TimeInForce`], [`GoodTil`], [`OrderHash`]
//! - **Markets**: [`ClobPair`], [`ClobPairStatus`], [`Perpetual`]
//! - **Operations queue**: [`InternalOperation`], [`ClobMatch`], [`MakerFill`], [`DeleveragingFill`]
//! - **Matches**: [`MatchWithOrders`], [`MatchableOrder`], [`LiquidationOrder`]
//! - **Ledger views**: [`Subaccount`], [`RiskSnapshot`], [`SubaccountUpdate`], [`UpdateResult`]
//! - **Configuration**: [`LiquidationsConfig`] and its parts
//! - **Block**: [`BlockContext`], [`ExecMode`], [`ProcessProposerMatchesEvents`]
//! - **Collaborators**: [`Ledger`], [`PerpetualMarket`], [`FeeTiers`], [`EventSink`], [`Collaborators`]
//! - **Errors**: [`ClobError`] with `CLOB_ERR_` prefix codes, and fatal [`fault::InvariantViolation`]
//! - **Math**: exact big-integer and rational helpers in [`math`]

pub mod block;
pub mod clob_pair;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod fault;
pub mod ids;
pub mod matching;
pub mod math;
pub mod operations;
pub mod order;
pub mod subaccount;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use block::*;
pub use clob_pair::*;
pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use matching::*;
pub use operations::*;
pub use order::*;
pub use subaccount::*;

// Constants, math and faults are accessed by module path
// (`perpclob_types::constants::FOO`, `perpclob_types::fault::raise`).
