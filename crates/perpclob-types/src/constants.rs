//! System-wide constants for the PerpClob core.

/// Order flag for short-term orders (pruned by block height).
pub const ORDER_FLAGS_SHORT_TERM: u32 = 0;

/// Order flag for conditional orders (stateful, triggered by price).
pub const ORDER_FLAGS_CONDITIONAL: u32 = 32;

/// Order flag for long-term orders (stateful, pruned explicitly).
pub const ORDER_FLAGS_LONG_TERM: u32 = 64;

/// Number of blocks a short-term order may live past the current height.
pub const SHORT_BLOCK_WINDOW: u32 = 20;

/// Maximum lifetime of a stateful order past the last committed block time (95 days).
pub const STATEFUL_ORDER_TIME_WINDOW_SECS: i64 = 95 * 24 * 60 * 60;

/// Multiplier applied to a market's minimum price change when clamping
/// trade prices used to trigger conditional orders.
pub const CONDITIONAL_ORDER_TRIGGER_MULTIPLIER: u64 = 5;

/// Default cap on open stateful orders per subaccount.
pub const MAX_STATEFUL_ORDERS_PER_SUBACCOUNT: u32 = 20;

/// Parts-per-million denominator.
pub const ONE_MILLION: u32 = 1_000_000;

/// Pruning height recorded for stateful orders, which are never pruned by height.
pub const STATEFUL_PRUNABLE_BLOCK_HEIGHT: u32 = u32::MAX;

/// Default maximum liquidation fee (0.5%).
pub const DEFAULT_MAX_LIQUIDATION_FEE_PPM: u32 = 5_000;

/// Default bankruptcy adjustment (1x).
pub const DEFAULT_BANKRUPTCY_ADJUSTMENT_PPM: u32 = ONE_MILLION;

/// Default spread to maintenance margin ratio (10%).
pub const DEFAULT_SPREAD_TO_MMR_PPM: u32 = 100_000;

/// Default minimum position notional liquidated per block ($0.001 in quote quantums).
pub const DEFAULT_MIN_POSITION_NOTIONAL_LIQUIDATED: u64 = 1_000;

/// Default maximum portion of a position liquidated per block (100%).
pub const DEFAULT_MAX_POSITION_PORTION_LIQUIDATED_PPM: u32 = ONE_MILLION;

/// Default per-subaccount notional liquidated per block.
pub const DEFAULT_MAX_NOTIONAL_LIQUIDATED: u64 = 100_000_000_000_000;

/// Default per-subaccount insurance fund loss per block.
pub const DEFAULT_MAX_QUANTUMS_INSURANCE_LOST: u64 = 100_000_000_000_000;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Module name, used as a namespace prefix and in log lines.
pub const MODULE_NAME: &str = "clob";
