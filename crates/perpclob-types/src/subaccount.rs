//! Subaccount, position and perpetual views shared with the ledger collaborators.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::{PerpetualId, SubaccountId};

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A signed perpetual position. Longs are positive, shorts negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualPosition {
    pub perpetual_id: PerpetualId,
    pub quantums: BigInt,
}

/// Ledger view of a subaccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subaccount {
    pub id: SubaccountId,
    /// Quote quantums (USDC, 10^-6).
    pub quote_balance: BigInt,
    /// Sorted by perpetual id, no zero-sized entries.
    pub perpetual_positions: Vec<PerpetualPosition>,
}

impl Subaccount {
    #[must_use]
    pub fn new(id: SubaccountId, quote_balance: impl Into<BigInt>) -> Self {
        Self {
            id,
            quote_balance: quote_balance.into(),
            perpetual_positions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_position(mut self, perpetual_id: PerpetualId, quantums: impl Into<BigInt>) -> Self {
        self.add_to_position(perpetual_id, &quantums.into());
        self
    }

    #[must_use]
    pub fn position(&self, perpetual_id: PerpetualId) -> Option<&PerpetualPosition> {
        self.perpetual_positions
            .iter()
            .find(|p| p.perpetual_id == perpetual_id)
    }

    /// Position size, zero when absent.
    #[must_use]
    pub fn position_size(&self, perpetual_id: PerpetualId) -> BigInt {
        self.position(perpetual_id)
            .map(|p| p.quantums.clone())
            .unwrap_or_default()
    }

    /// Apply a signed delta to one position, keeping the list sorted and dropping closed positions.
    pub fn add_to_position(&mut self, perpetual_id: PerpetualId, delta: &BigInt) {
        match self
            .perpetual_positions
            .binary_search_by_key(&perpetual_id, |p| p.perpetual_id)
        {
            Ok(i) => {
                self.perpetual_positions[i].quantums += delta;
                if self.perpetual_positions[i].quantums.is_zero() {
                    self.perpetual_positions.remove(i);
                }
            }
            Err(i) => {
                if !delta.is_zero() {
                    self.perpetual_positions.insert(
                        i,
                        PerpetualPosition {
                            perpetual_id,
                            quantums: delta.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Apply a full ledger update to this subaccount in place.
    pub fn apply(&mut self, update: &SubaccountUpdate) {
        self.quote_balance += &update.quote_delta;
        for p in &update.perpetual_updates {
            self.add_to_position(p.perpetual_id, &p.quantums_delta);
        }
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Net collateral and margin requirements in quote quantums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub net_collateral: BigInt,
    pub initial_margin: BigInt,
    pub maintenance_margin: BigInt,
}

impl RiskSnapshot {
    /// Below maintenance margin while carrying risk.
    #[must_use]
    pub fn is_liquidatable(&self) -> bool {
        self.maintenance_margin.is_positive() && self.maintenance_margin > self.net_collateral
    }

    #[must_use]
    pub fn is_initial_margin_collateralized(&self) -> bool {
        self.net_collateral >= self.initial_margin
    }
}

/// Margin requirements of a single position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRequirements {
    pub initial: BigInt,
    pub maintenance: BigInt,
}

/// What a subaccount has already been liquidated for in the current block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountLiquidationInfo {
    /// Each perpetual appears at most once.
    pub perpetuals_liquidated: Vec<PerpetualId>,
    /// Quote quantums.
    pub notional_liquidated: u64,
    pub quantums_insurance_lost: u64,
}

impl SubaccountLiquidationInfo {
    #[must_use]
    pub fn has_liquidated(&self, perpetual_id: PerpetualId) -> bool {
        self.perpetuals_liquidated.contains(&perpetual_id)
    }
}

// ---------------------------------------------------------------------------
// Perpetuals
// ---------------------------------------------------------------------------

/// Static parameters of a perpetual market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perpetual {
    pub id: PerpetualId,
    pub ticker: String,
    pub market_id: u32,
    /// Base quantums are `10^atomic_resolution` of one unit.
    pub atomic_resolution: i32,
    pub initial_margin_ppm: u32,
    /// Maintenance margin as a fraction of initial margin.
    pub maintenance_fraction_ppm: u32,
    /// Smallest price move the oracle reports, used to clamp trigger prices.
    pub min_price_change_ppm: u32,
}

// ---------------------------------------------------------------------------
// Ledger updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualUpdate {
    pub perpetual_id: PerpetualId,
    pub quantums_delta: BigInt,
}

/// Signed balance and position changes for one subaccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountUpdate {
    pub subaccount_id: SubaccountId,
    pub quote_delta: BigInt,
    pub perpetual_updates: Vec<PerpetualUpdate>,
}

impl SubaccountUpdate {
    /// An update with no deltas, used to query current risk.
    #[must_use]
    pub fn empty(subaccount_id: SubaccountId) -> Self {
        Self {
            subaccount_id,
            quote_delta: BigInt::zero(),
            perpetual_updates: Vec::new(),
        }
    }

    #[must_use]
    pub fn single(
        subaccount_id: SubaccountId,
        quote_delta: BigInt,
        perpetual_id: PerpetualId,
        quantums_delta: BigInt,
    ) -> Self {
        Self {
            subaccount_id,
            quote_delta,
            perpetual_updates: vec![PerpetualUpdate {
                perpetual_id,
                quantums_delta,
            }],
        }
    }
}

/// Which collateral rules the ledger applies to an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    Match,
    Deleverage,
}

/// Per-subaccount outcome of `update_subaccounts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateResult {
    Success,
    NewlyUndercollateralized,
    StillUndercollateralized,
    WithdrawalsAndTransfersBlocked,
    UpdateCausedError,
}

impl UpdateResult {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::NewlyUndercollateralized => "NewlyUndercollateralized",
            Self::StillUndercollateralized => "StillUndercollateralized",
            Self::WithdrawalsAndTransfersBlocked => "WithdrawalsAndTransfersBlocked",
            Self::UpdateCausedError => "UpdateCausedError",
        };
        f.write_str(s)
    }
}
