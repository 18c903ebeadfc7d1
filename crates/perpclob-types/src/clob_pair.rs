//! Clob pair configuration.

use serde::{Deserialize, Serialize};

use crate::{ClobError, ClobPairId, PerpetualId, Result};

/// Lifecycle status of a clob pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClobPairStatus {
    Initializing,
    #[default]
    Active,
    Paused,
    CancelOnly,
    PostOnly,
    FinalSettlement,
}

/// A perpetual trading pair.
///
/// Quote quantums for a fill are `base_quantums * subticks * 10^quantum_conversion_exponent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClobPair {
    pub id: ClobPairId,
    pub perpetual_id: PerpetualId,
    /// Every fill and order size is a multiple of this.
    pub step_base_quantums: u64,
    /// Every order price is a multiple of this.
    pub subticks_per_tick: u32,
    pub quantum_conversion_exponent: i32,
    pub min_order_base_quantums: u64,
    pub status: ClobPairStatus,
}

impl ClobPair {
    /// BTC-USD on perpetual 0: 10 quantum steps, 10_000 subticks per tick, exponent -8.
    #[must_use]
    pub fn btc_usd() -> Self {
        Self {
            id: ClobPairId(0),
            perpetual_id: 0,
            step_base_quantums: 10,
            subticks_per_tick: 10_000,
            quantum_conversion_exponent: -8,
            min_order_base_quantums: 10,
            status: ClobPairStatus::Active,
        }
    }

    /// ETH-USD on perpetual 1: 1_000 quantum steps, 1_000 subticks per tick, exponent -9.
    #[must_use]
    pub fn eth_usd() -> Self {
        Self {
            id: ClobPairId(1),
            perpetual_id: 1,
            step_base_quantums: 1_000,
            subticks_per_tick: 1_000,
            quantum_conversion_exponent: -9,
            min_order_base_quantums: 1_000,
            status: ClobPairStatus::Active,
        }
    }

    #[must_use]
    pub fn is_final_settlement(&self) -> bool {
        self.status == ClobPairStatus::FinalSettlement
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_base_quantums == 0 {
            return Err(ClobError::InvalidClobPair {
                reason: format!("{}: step_base_quantums must be positive", self.id),
            });
        }
        if self.subticks_per_tick == 0 {
            return Err(ClobError::InvalidClobPair {
                reason: format!("{}: subticks_per_tick must be positive", self.id),
            });
        }
        Ok(())
    }
}
