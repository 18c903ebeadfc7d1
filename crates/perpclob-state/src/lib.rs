//! # perpclob-state
//!
//! Storage tiers for the PerpClob core.
//!
//! ## Architecture
//!
//! - [`KvStore`]: ordered byte-keyed store, with [`MemKv`] as the in-memory backend
//! - [`Snapshot`]: copy-on-write overlay for speculative runs, committed or discarded
//! - [`keys`]: the single place where table keys are encoded
//! - [`ClobStore`]: durable tables (clob pairs, liquidations config, stateful
//!   orders, fill amounts, pruning schedule, last block time)
//! - [`BlockStore`]: block-scoped tables (liquidation info, trade prices,
//!   block summary), emptied by [`BlockStore::begin_block`]

mod codec;

pub mod block_store;
pub mod clob_store;
pub mod keys;
pub mod kv;
pub mod snapshot;

pub use block_store::{BlockStore, TradePriceBounds};
pub use clob_store::ClobStore;
pub use kv::{KvStore, MemKv};
pub use snapshot::{Snapshot, WriteSet};
