//! Liquidation pricing and sizing.
//!
//! The engine answers four questions about an undercollateralized
//! subaccount: is it liquidatable, which position goes first, how much of it
//! can be closed this block, and at what price. It also prices the insurance
//! fund's share of each liquidation fill.
//!
//! ## Terms
//!
//! - **TNC / TMMR**: total net collateral and maintenance margin of the subaccount.
//! - **PNNV / PMMR**: net notional value and maintenance margin of one position.
//! - **DNNV / DMMR**: change in PNNV and PMMR when the position is reduced by a delta.
//! - **ABR**: adjusted bankruptcy rating, `clamp((1 - TNC/TMMR) * BA, 0, 1)`.
//!
//! All of it is exact: big integers for quantums and rationals for prices.

use std::cmp::{Reverse, max, min};

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use perpclob_state::{BlockStore, ClobStore};
use perpclob_types::fault::{self, InvariantViolation};
use perpclob_types::math::{
    big_pow10, clamp_int, clamp_unit, fill_amount_to_quote_quantums, int_mul_ppm, must_u64,
    rat_mul_ppm, rat_round, round_to_multiple, sign,
};
use perpclob_types::{
    ClobError, ClobPair, Ledger, LiquidationOrder, LiquidationsConfig, PerpetualId,
    PerpetualMarket, PerpetualPosition, Result, RiskSnapshot, SubaccountId,
    SubaccountLiquidationInfo, SubaccountUpdate,
};

/// Read-only liquidation queries over the ledger and market collaborators.
pub struct LiquidationEngine<'a> {
    ledger: &'a dyn Ledger,
    markets: &'a dyn PerpetualMarket,
    config: LiquidationsConfig,
}

impl<'a> LiquidationEngine<'a> {
    #[must_use]
    pub fn new(
        ledger: &'a dyn Ledger,
        markets: &'a dyn PerpetualMarket,
        config: LiquidationsConfig,
    ) -> Self {
        Self {
            ledger,
            markets,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LiquidationsConfig {
        &self.config
    }

    #[must_use]
    pub fn markets(&self) -> &'a dyn PerpetualMarket {
        self.markets
    }

    // -----------------------------------------------------------------------
    // Eligibility
    // -----------------------------------------------------------------------

    /// True iff maintenance margin is positive and exceeds net collateral.
    pub fn is_liquidatable(&self, subaccount: &SubaccountId) -> Result<bool> {
        Ok(self.total_risk(subaccount)?.is_liquidatable())
    }

    /// # Errors
    /// [`ClobError::SubaccountNotLiquidatable`] when [`Self::is_liquidatable`] is false.
    pub fn ensure_is_liquidatable(&self, subaccount: &SubaccountId) -> Result<()> {
        if self.is_liquidatable(subaccount)? {
            Ok(())
        } else {
            Err(ClobError::SubaccountNotLiquidatable(subaccount.clone()))
        }
    }

    /// The lowest perpetual id among open positions not yet liquidated this block.
    pub fn get_perpetual_position_to_liquidate(
        &self,
        subaccount: &SubaccountId,
        info: &SubaccountLiquidationInfo,
    ) -> Result<PerpetualId> {
        self.ledger
            .get_subaccount(subaccount)
            .perpetual_positions
            .iter()
            .map(|p| p.perpetual_id)
            .find(|id| !info.has_liquidated(*id))
            .ok_or_else(|| ClobError::NoPerpetualPositionsToLiquidate {
                subaccount: subaccount.clone(),
            })
    }

    // -----------------------------------------------------------------------
    // Limits
    // -----------------------------------------------------------------------

    /// `(min, max)` notional of `position` that one liquidation may close.
    ///
    /// `min` never exceeds the position's notional, and `max` is never below `min`.
    pub fn get_max_and_min_position_notional_liquidatable(
        &self,
        position: &PerpetualPosition,
    ) -> Result<(BigInt, BigInt)> {
        let limits = &self.config.position_block_limits;
        let abs_notional = self
            .markets
            .get_net_notional(position.perpetual_id, &position.quantums)?
            .abs();
        let min_notional = min(
            BigInt::from(limits.min_position_notional_liquidated),
            abs_notional.clone(),
        );
        let max_notional = max(
            min_notional.clone(),
            int_mul_ppm(&abs_notional, limits.max_position_portion_liquidated_ppm),
        );
        Ok((min_notional, max_notional))
    }

    /// Notional the subaccount may still have liquidated in this block.
    ///
    /// # Errors
    /// [`ClobError::SubaccountHasLiquidatedPerpetual`] if `perpetual_id` was
    /// already liquidated for this subaccount in this block.
    pub fn get_subaccount_max_notional_liquidatable(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        info: &SubaccountLiquidationInfo,
    ) -> Result<BigInt> {
        ensure_not_liquidated(subaccount, perpetual_id, info)?;
        Ok(BigInt::from(remaining_under_limit(
            subaccount,
            "notional_liquidated",
            info.notional_liquidated,
            self.config.subaccount_block_limits.max_notional_liquidated,
        )))
    }

    /// Insurance fund payout the subaccount may still cause in this block.
    ///
    /// # Errors
    /// Same as [`Self::get_subaccount_max_notional_liquidatable`].
    pub fn get_subaccount_max_insurance_lost(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        info: &SubaccountLiquidationInfo,
    ) -> Result<BigInt> {
        ensure_not_liquidated(subaccount, perpetual_id, info)?;
        Ok(BigInt::from(remaining_under_limit(
            subaccount,
            "quantums_insurance_lost",
            info.quantums_insurance_lost,
            self.config.subaccount_block_limits.max_quantums_insurance_lost,
        )))
    }

    /// Signed base quantums to liquidate from the position, opposite in sign to it.
    ///
    /// The whole position is returned when it fits under both the position
    /// and subaccount limits, or when it is no larger than one step.
    /// Otherwise the tighter limit is converted to base quantums, rounded
    /// down to a step multiple and clamped to `[step, |position|]`.
    pub fn get_liquidatable_position_size_delta(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        clob_pair: &ClobPair,
        info: &SubaccountLiquidationInfo,
    ) -> Result<BigInt> {
        let account = self.ledger.get_subaccount(subaccount);
        let position = account.position(perpetual_id).ok_or_else(|| {
            ClobError::NoPerpetualPositionsToLiquidate {
                subaccount: subaccount.clone(),
            }
        })?;

        let (_, position_max) = self.get_max_and_min_position_notional_liquidatable(position)?;
        let subaccount_max =
            self.get_subaccount_max_notional_liquidatable(subaccount, perpetual_id, info)?;
        let bound = min(position_max, subaccount_max);

        let notional = self
            .markets
            .get_net_notional(perpetual_id, &position.quantums)?;
        let step = BigInt::from(clob_pair.step_base_quantums);
        let abs_size = position.quantums.abs();
        if notional.abs() <= bound || abs_size <= step {
            return Ok(-&position.quantums);
        }

        let base = self
            .markets
            .get_notional_in_base_quantums(perpetual_id, &bound)?;
        let abs_delta = clamp_int(round_to_multiple(&base, &step, false), &step, &abs_size);
        if position.quantums.is_positive() {
            Ok(-abs_delta)
        } else {
            Ok(abs_delta)
        }
    }

    // -----------------------------------------------------------------------
    // Prices
    // -----------------------------------------------------------------------

    /// Worst price, in quote quantums per base quantum, at which the position
    /// may be liquidated.
    ///
    /// `(PNNV - ABR * PMMR * SMMR) / PS`. The spread grows as the subaccount
    /// approaches bankruptcy and is capped at `SMMR` of the position's
    /// maintenance margin.
    ///
    /// # Panics
    /// Raises [`InvariantViolation::NegativeFillablePrice`] if the result is negative.
    pub fn get_fillable_price(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        delta_quantums: &BigInt,
    ) -> Result<BigRational> {
        let position = self.position_for_delta(subaccount, perpetual_id, delta_quantums)?;
        let pnnv = self.markets.get_net_notional(perpetual_id, &position)?;
        let pmmr = self
            .markets
            .get_margin_requirements(perpetual_id, &position)?
            .maintenance;

        let total = self.total_risk(subaccount)?;
        if total.net_collateral.is_negative() {
            tracing::info!(
                %subaccount,
                perpetual_id,
                tnc = %total.net_collateral,
                "Subaccount has negative total net collateral"
            );
        }

        let fp = &self.config.fillable_price_config;
        let abr = clamp_unit(rat_mul_ppm(
            &(BigRational::one() - collateral_ratio(&total)),
            fp.bankruptcy_adjustment_ppm,
        ));
        let max_spread = rat_mul_ppm(
            &BigRational::from_integer(pmmr),
            fp.spread_to_maintenance_margin_ratio_ppm,
        );
        let price =
            (BigRational::from_integer(pnnv) - abr * max_spread) / BigRational::from_integer(position);

        if price.is_negative() {
            fault::raise(InvariantViolation::NegativeFillablePrice {
                price: price.to_string(),
            });
        }
        Ok(price)
    }

    /// Quote quantums the subaccount receives for closing `delta_quantums`
    /// at its bankruptcy price.
    ///
    /// `-DNNV - floor(TNC * |DMMR| / TMMR)`: the position's share of total
    /// net collateral is what the subaccount can afford to give up.
    ///
    /// # Panics
    /// Raises [`InvariantViolation::PositiveDeltaMaintenanceMargin`] if
    /// reducing the position would increase its maintenance margin.
    pub fn get_bankruptcy_price_in_quote_quantums(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        delta_quantums: &BigInt,
    ) -> Result<BigInt> {
        let total = self.total_risk(subaccount)?;
        let old_size = self.position_for_delta(subaccount, perpetual_id, delta_quantums)?;
        let new_size = &old_size + delta_quantums;

        let dnnv = self.markets.get_net_notional(perpetual_id, &new_size)?
            - self.markets.get_net_notional(perpetual_id, &old_size)?;
        let dmmr = self
            .markets
            .get_margin_requirements(perpetual_id, &new_size)?
            .maintenance
            - self
                .markets
                .get_margin_requirements(perpetual_id, &old_size)?
                .maintenance;
        if dmmr.is_positive() {
            fault::raise(InvariantViolation::PositiveDeltaMaintenanceMargin {
                dmmr: dmmr.to_string(),
            });
        }

        let before_bankruptcy = if total.maintenance_margin.is_zero() {
            BigInt::zero()
        } else {
            (&total.net_collateral * dmmr.abs()).div_floor(&total.maintenance_margin)
        };
        Ok(-dnnv - before_bankruptcy)
    }

    // -----------------------------------------------------------------------
    // Insurance fund
    // -----------------------------------------------------------------------

    /// Insurance fund delta for one liquidation fill at `subticks`.
    ///
    /// Positive when the fill beats the bankruptcy price (the fund collects,
    /// capped at `max_liquidation_fee_ppm` of the fill's quote value) and
    /// negative when the fund has to cover the shortfall.
    ///
    /// # Errors
    /// [`ClobError::InvalidQuantumsForInsuranceFundDelta`] for a zero fill.
    pub fn get_liquidation_insurance_fund_delta(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        clob_pair: &ClobPair,
        is_buy: bool,
        fill_amount: u64,
        subticks: u64,
    ) -> Result<BigInt> {
        if fill_amount == 0 {
            return Err(ClobError::InvalidQuantumsForInsuranceFundDelta {
                subaccount: subaccount.clone(),
                perpetual_id,
            });
        }

        let mut delta_quantums = BigInt::from(fill_amount);
        let mut delta_quote = fill_amount_to_quote_quantums(
            subticks,
            fill_amount,
            clob_pair.quantum_conversion_exponent,
        );
        if is_buy {
            delta_quote = -delta_quote;
        } else {
            delta_quantums = -delta_quantums;
        }

        let bankruptcy =
            self.get_bankruptcy_price_in_quote_quantums(subaccount, perpetual_id, &delta_quantums)?;
        let delta = &delta_quote - bankruptcy;
        if !delta.is_positive() {
            return Ok(delta);
        }

        let max_fee = int_mul_ppm(&delta_quote.abs(), self.config.max_liquidation_fee_ppm);
        Ok(min(max_fee, delta))
    }

    /// A payout is valid only if the fund can cover it.
    #[must_use]
    pub fn is_valid_insurance_fund_delta(&self, delta: &BigInt, perpetual_id: PerpetualId) -> bool {
        !delta.is_negative()
            || !(self.ledger.get_insurance_fund_balance(perpetual_id) + delta).is_negative()
    }

    // -----------------------------------------------------------------------
    // Fill validation
    // -----------------------------------------------------------------------

    /// Check one liquidation fill against the subaccount's block limits.
    pub fn validate_liquidation_against_subaccount_block_limits(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        fill_amount: u64,
        insurance_delta: &BigInt,
        info: &SubaccountLiquidationInfo,
    ) -> Result<()> {
        let max_notional =
            self.get_subaccount_max_notional_liquidatable(subaccount, perpetual_id, info)?;
        let notional = self
            .markets
            .get_net_notional(perpetual_id, &BigInt::from(fill_amount))?;
        if notional.abs() > max_notional {
            return Err(ClobError::LiquidationExceedsSubaccountMaxNotionalLiquidated {
                subaccount: subaccount.clone(),
                perpetual_id,
                max: max_notional,
                notional,
            });
        }

        if insurance_delta.is_negative() {
            let max_lost = self.get_subaccount_max_insurance_lost(subaccount, perpetual_id, info)?;
            if insurance_delta.abs() > max_lost {
                return Err(ClobError::LiquidationExceedsSubaccountMaxInsuranceLost {
                    subaccount: subaccount.clone(),
                    perpetual_id,
                    max: max_lost,
                    lost: insurance_delta.clone(),
                });
            }
        }
        Ok(())
    }

    /// Price the insurance fund delta of a liquidation fill and reject fills
    /// the fund cannot cover or that break the subaccount's block limits.
    pub fn validate_matched_liquidation(
        &self,
        order: &LiquidationOrder,
        clob_pair: &ClobPair,
        fill_amount: u64,
        maker_subticks: u64,
        info: &SubaccountLiquidationInfo,
    ) -> Result<BigInt> {
        let insurance_delta = self.get_liquidation_insurance_fund_delta(
            &order.subaccount_id,
            order.perpetual_id,
            clob_pair,
            order.is_buy,
            fill_amount,
            maker_subticks,
        )?;

        if !self.is_valid_insurance_fund_delta(&insurance_delta, order.perpetual_id) {
            tracing::debug!(
                subaccount = %order.subaccount_id,
                perpetual_id = order.perpetual_id,
                delta = %insurance_delta,
                "Insurance fund has insufficient balance to process the liquidation"
            );
            return Err(ClobError::InsuranceFundHasInsufficientFunds {
                perpetual_id: order.perpetual_id,
                delta: insurance_delta,
            });
        }

        self.validate_liquidation_against_subaccount_block_limits(
            &order.subaccount_id,
            order.perpetual_id,
            fill_amount,
            &insurance_delta,
            info,
        )?;
        Ok(insurance_delta)
    }

    // -----------------------------------------------------------------------
    // Liquidation orders
    // -----------------------------------------------------------------------

    /// Build the liquidation order for one perpetual of the subaccount.
    pub fn get_liquidation_order_for_perpetual(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        clob_pair: &ClobPair,
        info: &SubaccountLiquidationInfo,
    ) -> Result<LiquidationOrder> {
        let delta =
            self.get_liquidatable_position_size_delta(subaccount, perpetual_id, clob_pair, info)?;
        let fillable_price = self.get_fillable_price(subaccount, perpetual_id, &delta)?;

        let is_liquidating_long = delta.is_negative();
        let subticks =
            convert_fillable_price_to_subticks(&fillable_price, is_liquidating_long, clob_pair);

        Ok(LiquidationOrder {
            subaccount_id: subaccount.clone(),
            clob_pair_id: clob_pair.id,
            perpetual_id,
            is_buy: !is_liquidating_long,
            quantums: must_u64(&delta.abs(), "liquidation order quantums"),
            subticks,
        })
    }

    /// The liquidation order for the subaccount's next position, if it is liquidatable.
    ///
    /// # Errors
    /// - [`ClobError::SubaccountNotLiquidatable`] if it is not
    /// - [`ClobError::NoPerpetualPositionsToLiquidate`] if every position was
    ///   already liquidated this block
    /// - [`ClobError::NoClobPairForPerpetual`] if the position has no market
    pub fn maybe_get_liquidation_order(
        &self,
        clob: &ClobStore<'_>,
        block: &BlockStore<'_>,
        subaccount: &SubaccountId,
    ) -> Result<LiquidationOrder> {
        self.ensure_is_liquidatable(subaccount)?;
        let info = block.get_subaccount_liquidation_info(subaccount);
        let perpetual_id = self.get_perpetual_position_to_liquidate(subaccount, &info)?;
        let clob_pair = clob.get_clob_pair_for_perpetual(perpetual_id)?;
        self.get_liquidation_order_for_perpetual(subaccount, perpetual_id, &clob_pair, &info)
    }

    /// Deterministic processing order for a batch of liquidation orders.
    ///
    /// Orders furthest from the oracle price (as a fraction of it) come
    /// first, then larger orders by quote quantums, then by order hash.
    ///
    /// # Errors
    /// Propagates clob pair, oracle price and notional lookup failures.
    pub fn sort_liquidation_orders(
        &self,
        clob: &ClobStore<'_>,
        orders: &mut [LiquidationOrder],
    ) -> Result<()> {
        let mut keyed = orders
            .iter()
            .map(|order| {
                let clob_pair = clob.must_get_clob_pair(order.clob_pair_id)?;
                let oracle = self.markets.get_oracle_price_subticks(&clob_pair)?;
                let distance = if oracle.is_zero() {
                    BigRational::zero()
                } else {
                    let price = BigRational::from_integer(BigInt::from(order.subticks));
                    ((price - &oracle) / &oracle).abs()
                };
                let notional = self
                    .markets
                    .get_net_notional(order.perpetual_id, &BigInt::from(order.quantums))?;
                Ok((Reverse(distance), Reverse(notional), order.hash(), order.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| (&a.0, &a.1, &a.2).cmp(&(&b.0, &b.1, &b.2)));
        for (slot, (_, _, _, order)) in orders.iter_mut().zip(keyed) {
            *slot = order;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn total_risk(&self, subaccount: &SubaccountId) -> Result<RiskSnapshot> {
        self.ledger
            .get_net_collateral_and_margin_requirements(&SubaccountUpdate::empty(subaccount.clone()))
    }

    /// The current position size, after checking that `delta` reduces it
    /// without flipping its sign.
    fn position_for_delta(
        &self,
        subaccount: &SubaccountId,
        perpetual_id: PerpetualId,
        delta: &BigInt,
    ) -> Result<BigInt> {
        let position = self
            .ledger
            .get_subaccount(subaccount)
            .position_size(perpetual_id);
        if sign(&position) * sign(delta) != -1 || position.abs() < delta.abs() {
            return Err(ClobError::InvalidPerpetualPositionSizeDelta {
                subaccount: subaccount.clone(),
                perpetual_id,
                delta: delta.clone(),
                position,
            });
        }
        Ok(position)
    }
}

/// Convert a fillable price to subticks on `clob_pair`.
///
/// Rounds against the liquidated subaccount's counterparty: up when
/// liquidating a long (a sell), down when liquidating a short (a buy). The
/// result is aligned to `subticks_per_tick` in the same direction and kept
/// within `[subticks_per_tick, u64::MAX - u64::MAX % subticks_per_tick]`.
///
/// # Panics
/// Raises a fault for a negative price, or if the bounded result is zero or
/// misaligned.
#[must_use]
pub fn convert_fillable_price_to_subticks(
    fillable_price: &BigRational,
    is_liquidating_long: bool,
    clob_pair: &ClobPair,
) -> u64 {
    if fillable_price.is_negative() {
        fault::raise(InvariantViolation::NegativeFillablePrice {
            price: fillable_price.to_string(),
        });
    }

    let (power, inverse) = big_pow10(clob_pair.quantum_conversion_exponent);
    let power = BigRational::from_integer(power);
    let subticks = if inverse {
        fillable_price * power
    } else {
        fillable_price / power
    };

    let round_up = is_liquidating_long;
    let subticks_per_tick = u64::from(clob_pair.subticks_per_tick);
    let spt = BigInt::from(subticks_per_tick);
    let aligned = round_to_multiple(&rat_round(&subticks, round_up), &spt, round_up);
    let upper = BigInt::from(u64::MAX - u64::MAX % subticks_per_tick);
    let bounded = must_u64(&clamp_int(aligned, &spt, &upper), "subticks");

    if bounded == 0 {
        fault::raise(InvariantViolation::ZeroSubticks);
    }
    if bounded % subticks_per_tick != 0 {
        fault::raise(InvariantViolation::UnalignedSubticks {
            subticks: bounded,
            subticks_per_tick: clob_pair.subticks_per_tick,
        });
    }
    bounded
}

fn collateral_ratio(total: &RiskSnapshot) -> BigRational {
    if total.maintenance_margin.is_zero() {
        BigRational::zero()
    } else {
        BigRational::new(
            total.net_collateral.clone(),
            total.maintenance_margin.clone(),
        )
    }
}

fn ensure_not_liquidated(
    subaccount: &SubaccountId,
    perpetual_id: PerpetualId,
    info: &SubaccountLiquidationInfo,
) -> Result<()> {
    if info.has_liquidated(perpetual_id) {
        return Err(ClobError::SubaccountHasLiquidatedPerpetual {
            subaccount: subaccount.clone(),
            perpetual_id,
        });
    }
    Ok(())
}

fn remaining_under_limit(subaccount: &SubaccountId, what: &'static str, used: u64, limit: u64) -> u64 {
    if used > limit {
        fault::raise(InvariantViolation::BlockLimitExceeded {
            subaccount: subaccount.to_string(),
            what,
            used,
            limit,
        });
    }
    limit - used
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpclob_state::MemKv;
    use perpclob_types::testing::*;
    use perpclob_types::{PositionBlockLimits, Subaccount, SubaccountBlockLimits};
    use proptest::prelude::*;

    /// Carl is short 1 BTC at $50,000 and holds `quote_usd` dollars.
    fn carl_short_world(quote_usd: i64) -> TestWorld {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_100_percent_margin()));
        world
            .ledger
            .put_subaccount(Subaccount::new(carl(), dollars(quote_usd)).with_position(0, -btc(1)));
        world
    }

    fn engine(world: &TestWorld) -> LiquidationEngine<'_> {
        engine_with(world, LiquidationsConfig::default())
    }

    fn engine_with(world: &TestWorld, config: LiquidationsConfig) -> LiquidationEngine<'_> {
        LiquidationEngine::new(&world.ledger, world.market.as_ref(), config)
    }

    fn no_info() -> SubaccountLiquidationInfo {
        SubaccountLiquidationInfo::default()
    }

    // =====================================================================
    // Eligibility
    // =====================================================================

    #[test]
    fn liquidatable_iff_maintenance_exceeds_collateral() {
        let world = carl_short_world(54_999);
        assert!(engine(&world).is_liquidatable(&carl()).unwrap());

        let world = carl_short_world(100_000);
        let engine = engine(&world);
        assert!(!engine.is_liquidatable(&carl()).unwrap());
        assert!(matches!(
            engine.ensure_is_liquidatable(&carl()),
            Err(ClobError::SubaccountNotLiquidatable(_))
        ));
    }

    #[test]
    fn empty_subaccount_is_not_liquidatable() {
        let world = TestWorld::new(btc_eth_market(btc_perpetual_100_percent_margin()));
        assert!(!engine(&world).is_liquidatable(&alice()).unwrap());
    }

    #[test]
    fn lowest_unliquidated_perpetual_goes_first() {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_20_10_margin()));
        world.ledger.put_subaccount(
            Subaccount::new(alice(), dollars(-1_000))
                .with_position(1, 1_000_000_000)
                .with_position(0, btc(1)),
        );
        let engine = engine(&world);

        assert_eq!(engine.get_perpetual_position_to_liquidate(&alice(), &no_info()).unwrap(), 0);

        let mut info = no_info();
        info.perpetuals_liquidated.push(0);
        assert_eq!(engine.get_perpetual_position_to_liquidate(&alice(), &info).unwrap(), 1);

        info.perpetuals_liquidated.push(1);
        assert!(matches!(
            engine.get_perpetual_position_to_liquidate(&alice(), &info),
            Err(ClobError::NoPerpetualPositionsToLiquidate { .. })
        ));
    }

    // =====================================================================
    // Prices
    // =====================================================================

    #[test]
    fn bankruptcy_price_of_full_close() {
        let world = carl_short_world(54_999);
        let price = engine(&world)
            .get_bankruptcy_price_in_quote_quantums(&carl(), 0, &btc(1))
            .unwrap();
        assert_eq!(price, -dollars(54_999));
    }

    #[test]
    fn bankruptcy_price_of_partial_close_takes_share_of_collateral() {
        let world = carl_short_world(54_999);
        // Half the position: DNNV = -25,000, DMMR = -25,000, TNC share = 2,499.5 floored.
        let price = engine(&world)
            .get_bankruptcy_price_in_quote_quantums(&carl(), 0, &BigInt::from(50_000_000))
            .unwrap();
        assert_eq!(price, -dollars(25_000) - BigInt::from(2_499_500_000i64));
    }

    #[test]
    fn deltas_must_reduce_the_position() {
        let world = carl_short_world(54_999);
        let engine = engine(&world);

        for delta in [-btc(1), btc(2), BigInt::zero()] {
            assert!(matches!(
                engine.get_bankruptcy_price_in_quote_quantums(&carl(), 0, &delta),
                Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
            ));
            assert!(matches!(
                engine.get_fillable_price(&carl(), 0, &delta),
                Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
            ));
        }
    }

    #[test]
    fn fillable_price_of_short_near_bankruptcy() {
        let world = carl_short_world(54_999);
        let price = engine(&world).get_fillable_price(&carl(), 0, &btc(1)).unwrap();
        // 545.001 quote quantums per base quantum.
        assert_eq!(
            price,
            BigRational::new(BigInt::from(545_001), BigInt::from(1_000))
        );
        assert_eq!(
            convert_fillable_price_to_subticks(&price, false, &ClobPair::btc_usd()),
            54_500_100_000
        );
    }

    #[test]
    fn fillable_price_spread_saturates_at_bankruptcy() {
        let world = carl_short_world(50_499);
        let price = engine(&world).get_fillable_price(&carl(), 0, &btc(1)).unwrap();
        assert_eq!(
            convert_fillable_price_to_subticks(&price, false, &ClobPair::btc_usd()),
            54_950_100_000
        );

        // Negative TNC clamps ABR at 1: the full 10% spread.
        let world = carl_short_world(49_000);
        let price = engine(&world).get_fillable_price(&carl(), 0, &btc(1)).unwrap();
        assert_eq!(price, BigRational::from_integer(BigInt::from(550)));
    }

    // =====================================================================
    // Subticks conversion
    // =====================================================================

    #[test]
    fn subticks_round_toward_the_liquidated_side() {
        let pair = ClobPair::btc_usd();
        let price = BigRational::new(BigInt::from(5_000_001), BigInt::from(10_000));
        // 500.0001 * 1e8 = 50_000_010_000, already aligned.
        assert_eq!(convert_fillable_price_to_subticks(&price, true, &pair), 50_000_010_000);

        let price = BigRational::new(BigInt::from(50_000_001), BigInt::from(100_000));
        // 500.00001 * 1e8 = 50_000_001_000.
        assert_eq!(convert_fillable_price_to_subticks(&price, true, &pair), 50_000_010_000);
        assert_eq!(convert_fillable_price_to_subticks(&price, false, &pair), 50_000_000_000);
    }

    #[test]
    fn subticks_are_clamped_into_range() {
        let pair = ClobPair::btc_usd();
        assert_eq!(
            convert_fillable_price_to_subticks(&BigRational::zero(), false, &pair),
            10_000
        );
        let huge = BigRational::from_integer(BigInt::from(u64::MAX));
        assert_eq!(
            convert_fillable_price_to_subticks(&huge, true, &pair),
            u64::MAX - u64::MAX % 10_000
        );
    }

    #[test]
    fn positive_exponent_divides() {
        let pair = ClobPair {
            quantum_conversion_exponent: 2,
            subticks_per_tick: 5,
            ..ClobPair::btc_usd()
        };
        let price = BigRational::from_integer(BigInt::from(1_234));
        assert_eq!(convert_fillable_price_to_subticks(&price, true, &pair), 15);
        assert_eq!(convert_fillable_price_to_subticks(&price, false, &pair), 10);
    }

    #[test]
    #[should_panic(expected = "CLOB_FAULT_01")]
    fn negative_price_is_fatal() {
        let price = BigRational::from_integer(BigInt::from(-1));
        let _ = convert_fillable_price_to_subticks(&price, true, &ClobPair::btc_usd());
    }

    proptest! {
        #[test]
        fn converted_subticks_are_aligned_and_in_range(
            numer in 0u64..u64::MAX,
            denom in 1u64..1_000_000,
            spt in 1u32..100_000,
            exponent in -10i32..4,
            is_long in any::<bool>(),
        ) {
            let pair = ClobPair {
                subticks_per_tick: spt,
                quantum_conversion_exponent: exponent,
                ..ClobPair::btc_usd()
            };
            let price = BigRational::new(BigInt::from(numer), BigInt::from(denom));
            let subticks = convert_fillable_price_to_subticks(&price, is_long, &pair);
            let spt = u64::from(spt);
            prop_assert_eq!(subticks % spt, 0);
            prop_assert!(subticks >= spt);
            prop_assert!(subticks <= u64::MAX - u64::MAX % spt);
        }
    }

    // =====================================================================
    // Insurance fund
    // =====================================================================

    #[test]
    fn fill_above_bankruptcy_pays_capped_fee() {
        let world = carl_short_world(54_999);
        let delta = engine(&world)
            .get_liquidation_insurance_fund_delta(
                &carl(),
                0,
                &ClobPair::btc_usd(),
                true,
                100_000_000,
                btc_subticks(50_000),
            )
            .unwrap();
        // 0.5% of $50,000.
        assert_eq!(delta, dollars(250));
    }

    #[test]
    fn fill_below_bankruptcy_draws_from_fund() {
        let world = carl_short_world(50_499);
        let delta = engine(&world)
            .get_liquidation_insurance_fund_delta(
                &carl(),
                0,
                &ClobPair::btc_usd(),
                true,
                100_000_000,
                btc_subticks(50_500),
            )
            .unwrap();
        assert_eq!(delta, -dollars(1));
    }

    #[test]
    fn fill_at_bankruptcy_price_is_zero() {
        let world = carl_short_world(50_000);
        let delta = engine(&world)
            .get_liquidation_insurance_fund_delta(
                &carl(),
                0,
                &ClobPair::btc_usd(),
                true,
                100_000_000,
                btc_subticks(50_000),
            )
            .unwrap();
        assert!(delta.is_zero());
    }

    proptest! {
        #[test]
        fn partial_fill_at_bankruptcy_price_is_zero(
            quote_usd in 0i64..150_000,
            // Fill sizes that divide 1e8, so the bankruptcy subticks are whole.
            twos in 0u32..=7,
            fives in 0u32..=7,
            extra_steps in 0u64..10_000_000,
        ) {
            let pair = ClobPair::btc_usd();
            let fill = pair.step_base_quantums * 2u64.pow(twos) * 5u64.pow(fives);
            let position = fill + extra_steps * pair.step_base_quantums;
            let mut world = TestWorld::new(btc_eth_market(btc_perpetual_100_percent_margin()));
            world.ledger.put_subaccount(
                Subaccount::new(carl(), dollars(quote_usd)).with_position(0, -BigInt::from(position)),
            );
            let engine = engine(&world);

            let receives = -engine
                .get_bankruptcy_price_in_quote_quantums(&carl(), 0, &BigInt::from(fill))
                .unwrap();
            prop_assume!(receives.is_positive());
            let scaled = receives * BigInt::from(100_000_000u64);
            if !(&scaled % BigInt::from(fill)).is_zero() {
                return Ok(());
            }
            let Ok(subticks) = u64::try_from(scaled / BigInt::from(fill)) else {
                return Ok(());
            };

            let delta = engine
                .get_liquidation_insurance_fund_delta(&carl(), 0, &pair, true, fill, subticks)
                .unwrap();
            prop_assert!(delta.is_zero(), "delta {} at {} subticks", delta, subticks);
        }
    }

    #[test]
    fn zero_fill_has_no_insurance_delta() {
        let world = carl_short_world(54_999);
        assert!(matches!(
            engine(&world).get_liquidation_insurance_fund_delta(
                &carl(),
                0,
                &ClobPair::btc_usd(),
                true,
                0,
                btc_subticks(50_000),
            ),
            Err(ClobError::InvalidQuantumsForInsuranceFundDelta { .. })
        ));
    }

    #[test]
    fn insurance_delta_validity_depends_on_fund() {
        let mut world = carl_short_world(54_999);
        world.ledger.set_insurance_fund(dollars(1));
        let engine = engine(&world);
        assert!(engine.is_valid_insurance_fund_delta(&dollars(5), 0));
        assert!(engine.is_valid_insurance_fund_delta(&-dollars(1), 0));
        assert!(!engine.is_valid_insurance_fund_delta(&-dollars(2), 0));
    }

    // =====================================================================
    // Sizing and limits
    // =====================================================================

    #[test]
    fn small_positions_are_closed_in_full() {
        let world = carl_short_world(54_999);
        let delta = engine(&world)
            .get_liquidatable_position_size_delta(&carl(), 0, &ClobPair::btc_usd(), &no_info())
            .unwrap();
        assert_eq!(delta, btc(1));
    }

    #[test]
    fn position_portion_limits_the_delta() {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_100_percent_margin()));
        world
            .ledger
            .put_subaccount(Subaccount::new(dave(), dollars(-5_000)).with_position(0, btc(1)));
        let config = LiquidationsConfig {
            position_block_limits: PositionBlockLimits {
                min_position_notional_liquidated: 1_000,
                max_position_portion_liquidated_ppm: 500_000,
            },
            ..LiquidationsConfig::default()
        };
        let delta = engine_with(&world, config)
            .get_liquidatable_position_size_delta(&dave(), 0, &ClobPair::btc_usd(), &no_info())
            .unwrap();
        assert_eq!(delta, BigInt::from(-50_000_000));
    }

    #[test]
    fn subaccount_notional_limit_counts_earlier_liquidations() {
        let world = carl_short_world(54_999);
        let config = LiquidationsConfig {
            subaccount_block_limits: SubaccountBlockLimits {
                max_notional_liquidated: dollars(15_000).try_into().unwrap(),
                max_quantums_insurance_lost: 1_000_000,
            },
            ..LiquidationsConfig::default()
        };
        let info = SubaccountLiquidationInfo {
            perpetuals_liquidated: vec![1],
            notional_liquidated: dollars(5_000).try_into().unwrap(),
            quantums_insurance_lost: 0,
        };
        let engine = engine_with(&world, config);

        assert_eq!(
            engine.get_subaccount_max_notional_liquidatable(&carl(), 0, &info).unwrap(),
            dollars(10_000)
        );
        let delta = engine
            .get_liquidatable_position_size_delta(&carl(), 0, &ClobPair::btc_usd(), &info)
            .unwrap();
        assert_eq!(delta, BigInt::from(20_000_000));
    }

    #[test]
    fn min_and_max_position_notional() {
        let world = carl_short_world(54_999);
        let engine = engine(&world);
        let position = PerpetualPosition {
            perpetual_id: 0,
            quantums: BigInt::from(-10),
        };
        // 10 quantums are worth 5,000 quote quantums, above the 1,000 minimum.
        let (lo, hi) = engine
            .get_max_and_min_position_notional_liquidatable(&position)
            .unwrap();
        assert_eq!((lo, hi), (BigInt::from(1_000), BigInt::from(5_000)));

        let tiny = PerpetualPosition {
            perpetual_id: 0,
            quantums: BigInt::from(1),
        };
        let (lo, hi) = engine
            .get_max_and_min_position_notional_liquidatable(&tiny)
            .unwrap();
        assert_eq!((lo, hi), (BigInt::from(500), BigInt::from(500)));
    }

    #[test]
    fn liquidated_pair_has_no_remaining_limits() {
        let world = carl_short_world(54_999);
        let engine = engine(&world);
        let info = SubaccountLiquidationInfo {
            perpetuals_liquidated: vec![0],
            ..no_info()
        };
        assert!(matches!(
            engine.get_subaccount_max_notional_liquidatable(&carl(), 0, &info),
            Err(ClobError::SubaccountHasLiquidatedPerpetual { .. })
        ));
        assert!(matches!(
            engine.get_subaccount_max_insurance_lost(&carl(), 0, &info),
            Err(ClobError::SubaccountHasLiquidatedPerpetual { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "CLOB_FAULT_07")]
    fn usage_above_limit_is_fatal() {
        let world = carl_short_world(54_999);
        let info = SubaccountLiquidationInfo {
            quantums_insurance_lost: u64::MAX,
            ..no_info()
        };
        let _ = engine(&world).get_subaccount_max_insurance_lost(&carl(), 0, &info);
    }

    #[test]
    fn block_limits_reject_large_fills_and_payouts() {
        let world = carl_short_world(54_999);
        let config = LiquidationsConfig {
            subaccount_block_limits: SubaccountBlockLimits {
                max_notional_liquidated: dollars(10_000).try_into().unwrap(),
                max_quantums_insurance_lost: 500_000,
            },
            ..LiquidationsConfig::default()
        };
        let engine = engine_with(&world, config);

        assert!(matches!(
            engine.validate_liquidation_against_subaccount_block_limits(
                &carl(),
                0,
                100_000_000,
                &BigInt::zero(),
                &no_info(),
            ),
            Err(ClobError::LiquidationExceedsSubaccountMaxNotionalLiquidated { .. })
        ));
        assert!(matches!(
            engine.validate_liquidation_against_subaccount_block_limits(
                &carl(),
                0,
                10_000_000,
                &-dollars(1),
                &no_info(),
            ),
            Err(ClobError::LiquidationExceedsSubaccountMaxInsuranceLost { .. })
        ));
        assert!(engine
            .validate_liquidation_against_subaccount_block_limits(
                &carl(),
                0,
                10_000_000,
                &dollars(1),
                &no_info(),
            )
            .is_ok());
    }

    #[test]
    fn matched_liquidation_needs_a_solvent_fund() {
        let mut world = carl_short_world(50_499);
        let order = LiquidationOrder {
            subaccount_id: carl(),
            clob_pair_id: ClobPair::btc_usd().id,
            perpetual_id: 0,
            is_buy: true,
            quantums: 100_000_000,
            subticks: 54_950_100_000,
        };
        let result = engine(&world).validate_matched_liquidation(
            &order,
            &ClobPair::btc_usd(),
            100_000_000,
            btc_subticks(50_500),
            &no_info(),
        );
        assert!(matches!(
            result,
            Err(ClobError::InsuranceFundHasInsufficientFunds { .. })
        ));

        world.ledger.set_insurance_fund(dollars(1));
        let delta = engine(&world)
            .validate_matched_liquidation(
                &order,
                &ClobPair::btc_usd(),
                100_000_000,
                btc_subticks(50_500),
                &no_info(),
            )
            .unwrap();
        assert_eq!(delta, -dollars(1));
    }

    // =====================================================================
    // Liquidation orders
    // =====================================================================

    #[test]
    fn liquidation_order_from_stores() {
        let world = carl_short_world(54_999);
        let mut durable = MemKv::new();
        let mut scratch = MemKv::new();
        let mut clob = ClobStore::new(&mut durable);
        clob.set_clob_pair(&ClobPair::btc_usd()).unwrap();
        let mut block = BlockStore::new(&mut scratch);
        block.begin_block(1);

        let order = engine(&world)
            .maybe_get_liquidation_order(&clob, &block, &carl())
            .unwrap();
        assert_eq!(
            order,
            LiquidationOrder {
                subaccount_id: carl(),
                clob_pair_id: ClobPair::btc_usd().id,
                perpetual_id: 0,
                is_buy: true,
                quantums: 100_000_000,
                subticks: 54_500_100_000,
            }
        );
    }

    #[test]
    fn missing_clob_pair_is_an_error() {
        let world = carl_short_world(54_999);
        let mut durable = MemKv::new();
        let mut scratch = MemKv::new();
        let clob = ClobStore::new(&mut durable);
        let block = BlockStore::new(&mut scratch);

        assert!(matches!(
            engine(&world).maybe_get_liquidation_order(&clob, &block, &carl()),
            Err(ClobError::NoClobPairForPerpetual(0))
        ));
    }
}
