//! Block context and the per-block summary handed to later phases.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::{self, InvariantViolation};
use crate::OrderId;

/// Which execution path is running.
///
/// Only [`ExecMode::Deliver`] may mutate authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecMode {
    /// Block application.
    Deliver,
    /// Transaction admission.
    Check,
    /// Proposal preparation and other speculative runs.
    Simulate,
}

impl ExecMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deliver => "deliver",
            Self::Check => "check",
            Self::Simulate => "simulate",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Height, time and mode of the block being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub height: u32,
    pub block_time: DateTime<Utc>,
    pub mode: ExecMode,
}

impl BlockContext {
    #[must_use]
    pub fn deliver(height: u32, block_time: DateTime<Utc>) -> Self {
        Self {
            height,
            block_time,
            mode: ExecMode::Deliver,
        }
    }

    #[must_use]
    pub fn check(height: u32, block_time: DateTime<Utc>) -> Self {
        Self {
            height,
            block_time,
            mode: ExecMode::Check,
        }
    }

    /// Panics unless running in deliver mode.
    #[track_caller]
    pub fn assert_deliver_mode(&self) {
        if self.mode != ExecMode::Deliver {
            fault::raise(InvariantViolation::WrongExecMode {
                expected: ExecMode::Deliver.as_str(),
                actual: self.mode.as_str(),
            });
        }
    }
}

/// Order ids touched by one processed operations queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessProposerMatchesEvents {
    /// Queue order, after removals and replacements.
    pub placed_stateful_order_ids: Vec<OrderId>,
    /// Sorted, no duplicates.
    pub order_ids_filled_in_last_block: Vec<OrderId>,
    /// Sorted, no duplicates.
    pub removed_stateful_order_ids: Vec<OrderId>,
    pub expired_stateful_order_ids: Vec<OrderId>,
    pub block_height: u32,
}
