//! Narrow capability traits for everything this core does not own.
//!
//! Implementations are supplied per call through [`Collaborators`]; the
//! core never reaches for ambient state.

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::{
    ClobEvent, ClobPair, MarginRequirements, MatchWithOrders, Perpetual, PerpetualId, Result,
    RiskSnapshot, Subaccount, SubaccountId, SubaccountUpdate, UpdateResult, UpdateType,
};

/// Subaccount balances, the insurance fund and the fee collector.
pub trait Ledger {
    /// Returns an empty subaccount when none exists.
    fn get_subaccount(&self, id: &SubaccountId) -> Subaccount;

    /// Risk of the subaccount after hypothetically applying `update`.
    fn get_net_collateral_and_margin_requirements(
        &self,
        update: &SubaccountUpdate,
    ) -> Result<RiskSnapshot>;

    /// Apply all updates atomically. Nothing is written unless every result is `Success`.
    fn update_subaccounts(
        &mut self,
        updates: &[SubaccountUpdate],
        update_type: UpdateType,
    ) -> Result<(bool, Vec<UpdateResult>)>;

    fn get_insurance_fund_balance(&self, perpetual_id: PerpetualId) -> BigInt;

    /// Positive deltas pay into the fund, negative deltas draw from it.
    fn transfer_insurance_fund_payments(
        &mut self,
        delta: &BigInt,
        perpetual_id: PerpetualId,
    ) -> Result<()>;

    fn transfer_fees_to_fee_collector(&mut self, fees: &BigInt, perpetual_id: PerpetualId)
    -> Result<()>;
}

/// Perpetual parameters and oracle-priced valuations.
pub trait PerpetualMarket {
    fn get_perpetual(&self, id: PerpetualId) -> Result<Perpetual>;

    /// Signed notional of `quantums` in quote quantums.
    fn get_net_notional(&self, id: PerpetualId, quantums: &BigInt) -> Result<BigInt>;

    fn get_margin_requirements(
        &self,
        id: PerpetualId,
        quantums: &BigInt,
    ) -> Result<MarginRequirements>;

    /// Base quantums worth `quote_quantums` at the oracle price.
    fn get_notional_in_base_quantums(
        &self,
        id: PerpetualId,
        quote_quantums: &BigInt,
    ) -> Result<BigInt>;

    /// Oracle price of the pair's perpetual, in subticks.
    fn get_oracle_price_subticks(&self, clob_pair: &ClobPair) -> Result<BigRational>;
}

/// Signed fee rates. Negative rates are rebates.
pub trait FeeTiers {
    fn get_perpetual_fee_ppm(&self, owner: &str, is_taker: bool) -> i32;
}

pub trait StatsRecorder {
    fn record_fill(&mut self, taker: &SubaccountId, maker: &SubaccountId, notional: &BigInt);
}

pub trait RewardsRecorder {
    fn add_reward_shares_for_fill(&mut self, fill: &MatchWithOrders, fill_quote_quantums: &BigInt);
}

/// Indexer event sink.
pub trait EventSink {
    fn enabled(&self) -> bool;
    fn emit(&mut self, event: ClobEvent);
}

/// Borrowed bundle of collaborators for one call into the core.
pub struct Collaborators<'a> {
    pub ledger: &'a mut dyn Ledger,
    pub markets: &'a dyn PerpetualMarket,
    pub fee_tiers: &'a dyn FeeTiers,
    pub stats: &'a mut dyn StatsRecorder,
    pub rewards: &'a mut dyn RewardsRecorder,
    pub events: &'a mut dyn EventSink,
}

impl Collaborators<'_> {
    /// Emit if the sink is enabled; otherwise drop the event.
    pub fn emit(&mut self, event: ClobEvent) {
        if self.events.enabled() {
            self.events.emit(event);
        } else {
            tracing::warn!(event = ?event, "Event sink disabled, dropping event");
        }
    }
}
