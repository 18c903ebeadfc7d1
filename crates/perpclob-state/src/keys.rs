//! Key layout for every table.
//!
//! Integers are fixed-width big-endian so that byte order equals numeric
//! order. Subaccount owners are NUL-terminated rather than length-prefixed,
//! so encoded ids sort exactly like the derived `Ord` on [`SubaccountId`]
//! and [`OrderId`]. Prefix scans over order-id keyed tables therefore come
//! back in canonical order.

use perpclob_types::{ClobPairId, OrderId, PerpetualId, SubaccountId};

// ---------------------------------------------------------------------------
// Durable tables
// ---------------------------------------------------------------------------

pub const CLOB_PAIR_PREFIX: &[u8] = b"clob/pair/";
pub const PERPETUAL_CLOB_PAIR_PREFIX: &[u8] = b"clob/perp/";
pub const LIQUIDATIONS_CONFIG_KEY: &[u8] = b"clob/liq_config";
pub const STATEFUL_PLACEMENT_PREFIX: &[u8] = b"clob/so/placement/";
pub const STATEFUL_EXPIRATION_PREFIX: &[u8] = b"clob/so/expiry/";
pub const STATEFUL_COUNT_PREFIX: &[u8] = b"clob/so/count/";
pub const FILL_AMOUNT_PREFIX: &[u8] = b"clob/fill/";
pub const PRUNING_PREFIX: &[u8] = b"clob/prune/";
pub const LAST_BLOCK_TIME_KEY: &[u8] = b"clob/last_block_time";

// ---------------------------------------------------------------------------
// Block-scoped tables
// ---------------------------------------------------------------------------

pub const BLOCK_PREFIX: &[u8] = b"blk/";
pub const BLOCK_HEIGHT_KEY: &[u8] = b"blk/height";
pub const LIQUIDATION_INFO_PREFIX: &[u8] = b"blk/liq/";
pub const TRADE_PRICES_PREFIX: &[u8] = b"blk/px/";
pub const BLOCK_SUMMARY_KEY: &[u8] = b"blk/summary";

fn with_prefix(prefix: &[u8], capacity: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + capacity);
    key.extend_from_slice(prefix);
    key
}

/// Owner bytes, a NUL terminator, then the number.
pub fn encode_subaccount_id(buf: &mut Vec<u8>, id: &SubaccountId) {
    buf.extend_from_slice(id.owner.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&id.number.to_be_bytes());
}

/// Fields in the same order as the derived `Ord`.
pub fn encode_order_id(buf: &mut Vec<u8>, id: &OrderId) {
    encode_subaccount_id(buf, &id.subaccount_id);
    buf.extend_from_slice(&id.client_id.to_be_bytes());
    buf.extend_from_slice(&id.order_flags.to_be_bytes());
    buf.extend_from_slice(&id.clob_pair_id.0.to_be_bytes());
}

#[must_use]
pub fn clob_pair_key(id: ClobPairId) -> Vec<u8> {
    let mut key = with_prefix(CLOB_PAIR_PREFIX, 4);
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

#[must_use]
pub fn perpetual_clob_pair_key(perpetual_id: PerpetualId) -> Vec<u8> {
    let mut key = with_prefix(PERPETUAL_CLOB_PAIR_PREFIX, 4);
    key.extend_from_slice(&perpetual_id.to_be_bytes());
    key
}

#[must_use]
pub fn stateful_placement_key(id: &OrderId) -> Vec<u8> {
    let mut key = with_prefix(STATEFUL_PLACEMENT_PREFIX, 32);
    encode_order_id(&mut key, id);
    key
}

/// Expiration index: good-til-block-time first, so a prefix scan walks expiries in time order.
#[must_use]
pub fn stateful_expiration_key(good_til_block_time: u32, id: &OrderId) -> Vec<u8> {
    let mut key = with_prefix(STATEFUL_EXPIRATION_PREFIX, 36);
    key.extend_from_slice(&good_til_block_time.to_be_bytes());
    encode_order_id(&mut key, id);
    key
}

/// Decode the leading good-til-block-time of an expiration key.
#[must_use]
pub fn expiration_time_of(key: &[u8]) -> Option<u32> {
    let rest = key.strip_prefix(STATEFUL_EXPIRATION_PREFIX)?;
    let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[must_use]
pub fn stateful_count_key(id: &SubaccountId) -> Vec<u8> {
    let mut key = with_prefix(STATEFUL_COUNT_PREFIX, 16);
    encode_subaccount_id(&mut key, id);
    key
}

#[must_use]
pub fn fill_amount_key(id: &OrderId) -> Vec<u8> {
    let mut key = with_prefix(FILL_AMOUNT_PREFIX, 32);
    encode_order_id(&mut key, id);
    key
}

/// Pruning schedule: block height first, then the order id.
#[must_use]
pub fn pruning_key(height: u32, id: &OrderId) -> Vec<u8> {
    let mut key = with_prefix(PRUNING_PREFIX, 36);
    key.extend_from_slice(&height.to_be_bytes());
    encode_order_id(&mut key, id);
    key
}

/// Decode the leading block height of a pruning key.
#[must_use]
pub fn pruning_height_of(key: &[u8]) -> Option<u32> {
    let rest = key.strip_prefix(PRUNING_PREFIX)?;
    let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[must_use]
pub fn liquidation_info_key(id: &SubaccountId) -> Vec<u8> {
    let mut key = with_prefix(LIQUIDATION_INFO_PREFIX, 16);
    encode_subaccount_id(&mut key, id);
    key
}

#[must_use]
pub fn trade_prices_key(perpetual_id: PerpetualId) -> Vec<u8> {
    let mut key = with_prefix(TRADE_PRICES_PREFIX, 4);
    key.extend_from_slice(&perpetual_id.to_be_bytes());
    key
}
