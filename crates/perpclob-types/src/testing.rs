//! In-memory collaborators and fixtures for tests.
//!
//! Enabled by the `test-helpers` feature. The fixture market mirrors a BTC
//! perpetual with atomic resolution -8 priced by the oracle at $50,000, so one
//! base quantum is worth 500 quote quantums.

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::math::{rat_mul_pow10, rat_mul_ppm, rat_round};
use crate::{
    ClobError, ClobEvent, ClobPair, Collaborators, EventSink, FeeTiers, Ledger,
    MarginRequirements, MatchWithOrders, Perpetual, PerpetualId, PerpetualMarket, Result,
    RewardsRecorder, RiskSnapshot, StatsRecorder, Subaccount, SubaccountId, SubaccountUpdate,
    UpdateResult, UpdateType,
};

/// Quote asset atomic resolution (USDC, 10^-6).
pub const QUOTE_ATOMIC_RESOLUTION: i32 = -6;

/// $1 in quote quantums.
pub const ONE_DOLLAR: i64 = 1_000_000;

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Perpetual market
// ---------------------------------------------------------------------------

/// Oracle price `price * 10^exponent` in quote units per base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketPrice {
    pub price: u64,
    pub exponent: i32,
}

impl MarketPrice {
    /// Whole-dollar price with exponent -5.
    #[must_use]
    pub fn dollars(usd: u64) -> Self {
        Self {
            price: usd * 100_000,
            exponent: -5,
        }
    }
}

/// Perpetuals valued at fixed oracle prices.
#[derive(Debug, Clone, Default)]
pub struct FixedPerpetualMarket {
    perpetuals: BTreeMap<PerpetualId, (Perpetual, MarketPrice)>,
}

impl FixedPerpetualMarket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_perpetual(mut self, perpetual: Perpetual, price: MarketPrice) -> Self {
        self.perpetuals.insert(perpetual.id, (perpetual, price));
        self
    }

    fn lookup(&self, id: PerpetualId) -> Result<&(Perpetual, MarketPrice)> {
        self.perpetuals.get(&id).ok_or(ClobError::PerpetualNotFound(id))
    }

    fn quote_exponent(perpetual: &Perpetual, price: MarketPrice) -> i32 {
        perpetual.atomic_resolution + price.exponent - QUOTE_ATOMIC_RESOLUTION
    }
}

impl PerpetualMarket for FixedPerpetualMarket {
    fn get_perpetual(&self, id: PerpetualId) -> Result<Perpetual> {
        Ok(self.lookup(id)?.0.clone())
    }

    fn get_net_notional(&self, id: PerpetualId, quantums: &BigInt) -> Result<BigInt> {
        let (perpetual, price) = self.lookup(id)?;
        let value = quantums * BigInt::from(price.price);
        let exponent = Self::quote_exponent(perpetual, *price);
        Ok(rat_round(&rat_mul_pow10(&value, exponent), false))
    }

    fn get_margin_requirements(
        &self,
        id: PerpetualId,
        quantums: &BigInt,
    ) -> Result<MarginRequirements> {
        let (perpetual, _) = self.lookup(id)?;
        let notional = self.get_net_notional(id, &quantums.abs())?;
        let initial = rat_round(
            &rat_mul_ppm(&BigRational::from_integer(notional), perpetual.initial_margin_ppm),
            true,
        );
        let maintenance = rat_round(
            &rat_mul_ppm(
                &BigRational::from_integer(initial.clone()),
                perpetual.maintenance_fraction_ppm,
            ),
            true,
        );
        Ok(MarginRequirements {
            initial,
            maintenance,
        })
    }

    fn get_notional_in_base_quantums(
        &self,
        id: PerpetualId,
        quote_quantums: &BigInt,
    ) -> Result<BigInt> {
        let (perpetual, price) = self.lookup(id)?;
        let scaled = rat_mul_pow10(quote_quantums, -Self::quote_exponent(perpetual, *price));
        let base = scaled / BigRational::from_integer(BigInt::from(price.price));
        Ok(base.to_integer())
    }

    fn get_oracle_price_subticks(&self, clob_pair: &ClobPair) -> Result<BigRational> {
        let (perpetual, price) = self.lookup(clob_pair.perpetual_id)?;
        let exponent = price.exponent - clob_pair.quantum_conversion_exponent
            + perpetual.atomic_resolution
            - QUOTE_ATOMIC_RESOLUTION;
        Ok(rat_mul_pow10(&BigInt::from(price.price), exponent))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Subaccounts, a single insurance fund and a fee collector held in memory.
#[derive(Debug, Clone)]
pub struct MemLedger {
    market: Arc<FixedPerpetualMarket>,
    subaccounts: BTreeMap<SubaccountId, Subaccount>,
    insurance_fund: BigInt,
    fee_collector: BigInt,
    /// Makes the next fee transfer fail.
    pub fail_fee_transfer: bool,
    /// Makes the next insurance fund transfer fail.
    pub fail_insurance_transfer: bool,
    /// Forces every update to report this result.
    pub forced_update_result: Option<UpdateResult>,
}

impl MemLedger {
    #[must_use]
    pub fn new(market: Arc<FixedPerpetualMarket>) -> Self {
        Self {
            market,
            subaccounts: BTreeMap::new(),
            insurance_fund: BigInt::zero(),
            fee_collector: BigInt::zero(),
            fail_fee_transfer: false,
            fail_insurance_transfer: false,
            forced_update_result: None,
        }
    }

    pub fn put_subaccount(&mut self, subaccount: Subaccount) {
        self.subaccounts.insert(subaccount.id.clone(), subaccount);
    }

    pub fn set_insurance_fund(&mut self, balance: impl Into<BigInt>) {
        self.insurance_fund = balance.into();
    }

    #[must_use]
    pub fn insurance_fund(&self) -> &BigInt {
        &self.insurance_fund
    }

    #[must_use]
    pub fn fee_collector(&self) -> &BigInt {
        &self.fee_collector
    }

    fn risk_of(&self, subaccount: &Subaccount) -> Result<RiskSnapshot> {
        let mut risk = RiskSnapshot {
            net_collateral: subaccount.quote_balance.clone(),
            ..RiskSnapshot::default()
        };
        for position in &subaccount.perpetual_positions {
            risk.net_collateral += self
                .market
                .get_net_notional(position.perpetual_id, &position.quantums)?;
            let margin = self
                .market
                .get_margin_requirements(position.perpetual_id, &position.quantums)?;
            risk.initial_margin += margin.initial;
            risk.maintenance_margin += margin.maintenance;
        }
        Ok(risk)
    }

    fn check_update(&self, update: &SubaccountUpdate, update_type: UpdateType) -> Result<UpdateResult> {
        if let Some(forced) = self.forced_update_result {
            return Ok(forced);
        }
        if update_type == UpdateType::Deleverage {
            return Ok(UpdateResult::Success);
        }
        let before = self.get_subaccount(&update.subaccount_id);
        let mut after = before.clone();
        after.apply(update);
        let risk_before = self.risk_of(&before)?;
        let risk_after = self.risk_of(&after)?;
        if risk_after.is_initial_margin_collateralized() {
            return Ok(UpdateResult::Success);
        }
        if risk_before.is_initial_margin_collateralized() {
            return Ok(UpdateResult::NewlyUndercollateralized);
        }
        // Already undercollateralized: allow updates that reduce risk without going negative.
        if risk_after.maintenance_margin <= risk_before.maintenance_margin
            && !risk_after.net_collateral.is_negative()
        {
            Ok(UpdateResult::Success)
        } else {
            Ok(UpdateResult::StillUndercollateralized)
        }
    }
}

impl Ledger for MemLedger {
    fn get_subaccount(&self, id: &SubaccountId) -> Subaccount {
        self.subaccounts
            .get(id)
            .cloned()
            .unwrap_or_else(|| Subaccount::new(id.clone(), 0))
    }

    fn get_net_collateral_and_margin_requirements(
        &self,
        update: &SubaccountUpdate,
    ) -> Result<RiskSnapshot> {
        let mut subaccount = self.get_subaccount(&update.subaccount_id);
        subaccount.apply(update);
        self.risk_of(&subaccount)
    }

    fn update_subaccounts(
        &mut self,
        updates: &[SubaccountUpdate],
        update_type: UpdateType,
    ) -> Result<(bool, Vec<UpdateResult>)> {
        let results = updates
            .iter()
            .map(|u| self.check_update(u, update_type))
            .collect::<Result<Vec<_>>>()?;
        let success = results.iter().all(|r| r.is_success());
        if success {
            for update in updates {
                let mut subaccount = self.get_subaccount(&update.subaccount_id);
                subaccount.apply(update);
                self.subaccounts.insert(subaccount.id.clone(), subaccount);
            }
        }
        Ok((success, results))
    }

    fn get_insurance_fund_balance(&self, _perpetual_id: PerpetualId) -> BigInt {
        self.insurance_fund.clone()
    }

    fn transfer_insurance_fund_payments(
        &mut self,
        delta: &BigInt,
        _perpetual_id: PerpetualId,
    ) -> Result<()> {
        if self.fail_insurance_transfer {
            return Err(ClobError::Ledger {
                reason: "insurance fund rejected transfer".into(),
            });
        }
        let next = &self.insurance_fund + delta;
        if next.is_negative() {
            return Err(ClobError::Ledger {
                reason: format!("insurance fund cannot cover {delta}"),
            });
        }
        self.insurance_fund = next;
        Ok(())
    }

    fn transfer_fees_to_fee_collector(
        &mut self,
        fees: &BigInt,
        _perpetual_id: PerpetualId,
    ) -> Result<()> {
        if self.fail_fee_transfer {
            return Err(ClobError::Ledger {
                reason: "fee collector rejected transfer".into(),
            });
        }
        self.fee_collector += fees;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fees, stats, rewards, events
// ---------------------------------------------------------------------------

/// Same maker and taker rate for every account.
#[derive(Debug, Clone, Copy)]
pub struct FlatFeeTiers {
    pub maker_fee_ppm: i32,
    pub taker_fee_ppm: i32,
}

impl Default for FlatFeeTiers {
    fn default() -> Self {
        Self {
            maker_fee_ppm: 200,
            taker_fee_ppm: 500,
        }
    }
}

impl FeeTiers for FlatFeeTiers {
    fn get_perpetual_fee_ppm(&self, _owner: &str, is_taker: bool) -> i32 {
        if is_taker {
            self.taker_fee_ppm
        } else {
            self.maker_fee_ppm
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingStats {
    pub fills: Vec<(SubaccountId, SubaccountId, BigInt)>,
}

impl StatsRecorder for RecordingStats {
    fn record_fill(&mut self, taker: &SubaccountId, maker: &SubaccountId, notional: &BigInt) {
        self.fills.push((taker.clone(), maker.clone(), notional.clone()));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingRewards {
    pub shares: Vec<(u64, BigInt)>,
}

impl RewardsRecorder for RecordingRewards {
    fn add_reward_shares_for_fill(&mut self, fill: &MatchWithOrders, fill_quote_quantums: &BigInt) {
        self.shares.push((fill.fill_amount, fill_quote_quantums.clone()));
    }
}

/// Captures emitted events.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    pub enabled: bool,
    pub events: Vec<ClobEvent>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            enabled: true,
            events: Vec::new(),
        }
    }
}

impl EventSink for RecordingSink {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn emit(&mut self, event: ClobEvent) {
        self.events.push(event);
    }
}

/// Owns one of every collaborator and lends them out as a bundle.
pub struct TestWorld {
    pub market: Arc<FixedPerpetualMarket>,
    pub ledger: MemLedger,
    pub fee_tiers: FlatFeeTiers,
    pub stats: RecordingStats,
    pub rewards: RecordingRewards,
    pub sink: RecordingSink,
}

impl TestWorld {
    #[must_use]
    pub fn new(market: FixedPerpetualMarket) -> Self {
        let market = Arc::new(market);
        Self {
            ledger: MemLedger::new(Arc::clone(&market)),
            market,
            fee_tiers: FlatFeeTiers::default(),
            stats: RecordingStats::default(),
            rewards: RecordingRewards::default(),
            sink: RecordingSink::default(),
        }
    }

    pub fn collaborators(&mut self) -> Collaborators<'_> {
        Collaborators {
            ledger: &mut self.ledger,
            markets: self.market.as_ref(),
            fee_tiers: &self.fee_tiers,
            stats: &mut self.stats,
            rewards: &mut self.rewards,
            events: &mut self.sink,
        }
    }

    #[must_use]
    pub fn subaccount(&self, id: &SubaccountId) -> Subaccount {
        self.ledger.get_subaccount(id)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// BTC perpetual 0 with 100% initial and maintenance margin.
#[must_use]
pub fn btc_perpetual_100_percent_margin() -> Perpetual {
    Perpetual {
        id: 0,
        ticker: "BTC-USD".into(),
        market_id: 0,
        atomic_resolution: -8,
        initial_margin_ppm: 1_000_000,
        maintenance_fraction_ppm: 1_000_000,
        min_price_change_ppm: 50,
    }
}

/// BTC perpetual 0 with 20% initial and 10% maintenance margin.
#[must_use]
pub fn btc_perpetual_20_10_margin() -> Perpetual {
    Perpetual {
        initial_margin_ppm: 200_000,
        maintenance_fraction_ppm: 500_000,
        ..btc_perpetual_100_percent_margin()
    }
}

/// ETH perpetual 1 with 20% initial and 10% maintenance margin.
#[must_use]
pub fn eth_perpetual_20_10_margin() -> Perpetual {
    Perpetual {
        id: 1,
        ticker: "ETH-USD".into(),
        market_id: 1,
        atomic_resolution: -9,
        initial_margin_ppm: 200_000,
        maintenance_fraction_ppm: 500_000,
        min_price_change_ppm: 50,
    }
}

/// BTC at $50,000 and ETH at $3,000.
#[must_use]
pub fn btc_eth_market(btc: Perpetual) -> FixedPerpetualMarket {
    FixedPerpetualMarket::new()
        .with_perpetual(btc, MarketPrice::dollars(50_000))
        .with_perpetual(eth_perpetual_20_10_margin(), MarketPrice::dollars(3_000))
}

#[must_use]
pub fn carl() -> SubaccountId {
    SubaccountId::new("carl", 0)
}

#[must_use]
pub fn dave() -> SubaccountId {
    SubaccountId::new("dave", 0)
}

#[must_use]
pub fn alice() -> SubaccountId {
    SubaccountId::new("alice", 0)
}

#[must_use]
pub fn bob() -> SubaccountId {
    SubaccountId::new("bob", 0)
}

/// `usd` dollars in quote quantums.
#[must_use]
pub fn dollars(usd: i64) -> BigInt {
    BigInt::from(usd) * BigInt::from(ONE_DOLLAR)
}

/// `n` BTC in base quantums.
#[must_use]
pub fn btc(n: i64) -> BigInt {
    BigInt::from(n) * BigInt::from(100_000_000)
}

/// `price_usd` in BTC-USD subticks.
#[must_use]
pub fn btc_subticks(price_usd: u64) -> u64 {
    price_usd * 1_000_000
}
