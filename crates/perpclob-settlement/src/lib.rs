//! # perpclob-settlement
//!
//! Applies fills to the ledger.
//!
//! ## Architecture
//!
//! A single fill goes through [`process_single_match`]:
//! 1. Validate the fill and its step size
//! 2. Price it and look up fee rates (liquidation fills are also checked
//!    against the insurance fund and the subaccount's block limits)
//! 3. Check that neither order is overfilled
//! 4. Move the insurance fund delta, update both subaccounts atomically,
//!    then collect fees
//! 5. Record the trade price, rewards, stats and the match event
//! 6. Persist new fill amounts and the pruning schedule
//!
//! Deleveraging fills skip the book entirely and go through
//! [`deleveraging::process_deleveraging`].

pub mod deleveraging;
pub mod fills;
pub mod settle;
pub mod trade_prices;

pub use deleveraging::{
    DeleveragingVerdict, can_deleverage_subaccount, get_deleveraging_quote_quantums_delta,
    process_deleveraging,
};
pub use fills::{FillState, get_updated_order_fill_amount, set_order_fill_amounts_and_pruning};
pub use settle::{SettledMatch, process_single_match};
pub use trade_prices::{clamped_trade_prices_for_triggering, get_trade_prices, record_trade};
