//! # perpclob-operations
//!
//! Block-level driver for the PerpClob core.
//!
//! ## Architecture
//!
//! ```text
//! place_stateful_order ──▶ durable stateful orders
//!                               │
//! operations queue ──▶ process_operations ──▶ settlement / liquidation / deleveraging
//!                               │
//!                               ▼
//!                        block summary ──▶ end_block (pruning, expirations)
//! ```
//!
//! - [`processor`]: replays one block's operations queue in deliver mode
//! - [`stateful`]: validation, placement and removal of orders
//! - [`summary`]: the per-block [`ProcessProposerMatchesEvents`](perpclob_types::ProcessProposerMatchesEvents)
//! - [`end_block`]: fill-amount pruning and stateful order expiry
//! - [`hydrate`]: read-only liquidation previews on a discarded snapshot

pub mod end_block;
pub mod hydrate;
pub mod processor;
pub mod stateful;
pub mod summary;

pub use end_block::end_block;
pub use hydrate::preview_liquidation_orders;
pub use processor::process_operations;
pub use stateful::{perform_stateful_order_validation, place_stateful_order, remove_stateful_order};
pub use summary::build_block_summary;
