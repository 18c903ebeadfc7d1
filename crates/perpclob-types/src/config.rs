//! Governance-controlled liquidation configuration.

use serde::{Deserialize, Serialize};

use crate::{ClobError, Result, constants};

/// Parameters of the fillable-price spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillablePriceConfig {
    /// Scales the adjusted bankruptcy rating.
    pub bankruptcy_adjustment_ppm: u32,
    /// Spread as a fraction of the position's maintenance margin.
    pub spread_to_maintenance_margin_ratio_ppm: u32,
}

impl Default for FillablePriceConfig {
    fn default() -> Self {
        Self {
            bankruptcy_adjustment_ppm: constants::DEFAULT_BANKRUPTCY_ADJUSTMENT_PPM,
            spread_to_maintenance_margin_ratio_ppm: constants::DEFAULT_SPREAD_TO_MMR_PPM,
        }
    }
}

/// Per-position bounds on how much can be liquidated at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBlockLimits {
    /// Quote quantums; positions below this are liquidated in full.
    pub min_position_notional_liquidated: u64,
    pub max_position_portion_liquidated_ppm: u32,
}

impl Default for PositionBlockLimits {
    fn default() -> Self {
        Self {
            min_position_notional_liquidated: constants::DEFAULT_MIN_POSITION_NOTIONAL_LIQUIDATED,
            max_position_portion_liquidated_ppm:
                constants::DEFAULT_MAX_POSITION_PORTION_LIQUIDATED_PPM,
        }
    }
}

/// Per-subaccount, per-block liquidation caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountBlockLimits {
    pub max_notional_liquidated: u64,
    pub max_quantums_insurance_lost: u64,
}

impl Default for SubaccountBlockLimits {
    fn default() -> Self {
        Self {
            max_notional_liquidated: constants::DEFAULT_MAX_NOTIONAL_LIQUIDATED,
            max_quantums_insurance_lost: constants::DEFAULT_MAX_QUANTUMS_INSURANCE_LOST,
        }
    }
}

/// Durable liquidation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationsConfig {
    /// Cap on the insurance fee as a fraction of fill notional.
    pub max_liquidation_fee_ppm: u32,
    pub fillable_price_config: FillablePriceConfig,
    pub position_block_limits: PositionBlockLimits,
    pub subaccount_block_limits: SubaccountBlockLimits,
}

impl LiquidationsConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ClobError::InvalidLiquidationsConfig {
                reason: reason.to_string(),
            })
        };
        let one_million = constants::ONE_MILLION;

        if self.max_liquidation_fee_ppm == 0 || self.max_liquidation_fee_ppm > one_million {
            return invalid("max_liquidation_fee_ppm must be in (0, 1_000_000]");
        }
        if self.fillable_price_config.bankruptcy_adjustment_ppm < one_million {
            return invalid("bankruptcy_adjustment_ppm must be at least 1_000_000");
        }
        let smmr = self
            .fillable_price_config
            .spread_to_maintenance_margin_ratio_ppm;
        if smmr == 0 {
            return invalid("spread_to_maintenance_margin_ratio_ppm must be positive");
        }
        let portion = self.position_block_limits.max_position_portion_liquidated_ppm;
        if portion == 0 || portion > one_million {
            return invalid("max_position_portion_liquidated_ppm must be in (0, 1_000_000]");
        }
        if self.subaccount_block_limits.max_notional_liquidated == 0 {
            return invalid("max_notional_liquidated must be positive");
        }
        if self.subaccount_block_limits.max_quantums_insurance_lost == 0 {
            return invalid("max_quantums_insurance_lost must be positive");
        }
        Ok(())
    }
}

impl Default for LiquidationsConfig {
    fn default() -> Self {
        Self {
            max_liquidation_fee_ppm: constants::DEFAULT_MAX_LIQUIDATION_FEE_PPM,
            fillable_price_config: FillablePriceConfig::default(),
            position_block_limits: PositionBlockLimits::default(),
            subaccount_block_limits: SubaccountBlockLimits::default(),
        }
    }
}
