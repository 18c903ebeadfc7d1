//! What each subaccount has been liquidated for in the current block.
//!
//! Lives in the block store, so it is empty again after the next
//! [`BlockStore::begin_block`]. Read it with
//! [`BlockStore::get_subaccount_liquidation_info`].

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use perpclob_state::BlockStore;
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::{PerpetualId, SubaccountId};

/// Mark `perpetual_id` as liquidated for `subaccount` in this block.
///
/// # Panics
/// Raises [`InvariantViolation::DuplicateLiquidation`] if the pair was
/// already recorded.
pub fn must_record_perpetual_liquidated(
    block: &mut BlockStore<'_>,
    subaccount: &SubaccountId,
    perpetual_id: PerpetualId,
) {
    let mut info = block.get_subaccount_liquidation_info(subaccount);
    if info.has_liquidated(perpetual_id) {
        fault::raise(InvariantViolation::DuplicateLiquidation {
            subaccount: subaccount.to_string(),
            perpetual_id,
        });
    }
    info.perpetuals_liquidated.push(perpetual_id);
    block.set_subaccount_liquidation_info(subaccount, &info);
    tracing::debug!(%subaccount, perpetual_id, "Recorded perpetual as liquidated");
}

/// Add one liquidation fill to the subaccount's block totals.
///
/// The notional always counts in absolute value. The insurance delta only
/// counts when the fund paid out, i.e. when it is negative.
///
/// # Panics
/// Raises [`InvariantViolation::CounterOverflow`] if either total leaves `u64`.
pub fn accumulate_liquidation_info(
    block: &mut BlockStore<'_>,
    subaccount: &SubaccountId,
    notional_delta: &BigInt,
    insurance_delta: &BigInt,
) {
    let mut info = block.get_subaccount_liquidation_info(subaccount);
    info.notional_liquidated = add_to_counter(
        subaccount,
        "notional_liquidated",
        info.notional_liquidated,
        notional_delta,
    );
    if insurance_delta.is_negative() {
        info.quantums_insurance_lost = add_to_counter(
            subaccount,
            "quantums_insurance_lost",
            info.quantums_insurance_lost,
            insurance_delta,
        );
    }
    block.set_subaccount_liquidation_info(subaccount, &info);
}

fn add_to_counter(
    subaccount: &SubaccountId,
    counter: &'static str,
    current: u64,
    delta: &BigInt,
) -> u64 {
    delta
        .abs()
        .to_u64()
        .and_then(|d| current.checked_add(d))
        .unwrap_or_else(|| {
            fault::raise(InvariantViolation::CounterOverflow {
                subaccount: subaccount.to_string(),
                counter,
            })
        })
}
