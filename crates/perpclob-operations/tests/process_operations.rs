//! Replaying whole operations queues through `process_operations`.

use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use perpclob_operations::{end_block, place_stateful_order, process_operations};
use perpclob_state::{BlockStore, ClobStore, MemKv};
use perpclob_types::testing::*;
use perpclob_types::{
    BlockContext, ClobError, ClobEvent, ClobMatch, ClobPair, ClobPairId, DeleveragingFill,
    InternalOperation, MakerFill, Order, OrderSide, Perpetual, ProcessProposerMatchesEvents,
    RemovalReason, Result, Subaccount, TimeInForce,
};

// ===========================================================================
// Helpers
// ===========================================================================

const HEIGHT: u32 = 10;
const NOW: i64 = 1_700_000_000;

fn block_time() -> DateTime<Utc> {
    Utc.timestamp_opt(NOW + 5, 0).unwrap()
}

fn deliver() -> BlockContext {
    BlockContext::deliver(HEIGHT, block_time())
}

/// Durable state with both pairs listed, a fresh block at [`HEIGHT`] and a world of collaborators.
struct Chain {
    world: TestWorld,
    durable: MemKv,
    scratch: MemKv,
}

impl Chain {
    fn new(btc: Perpetual) -> Self {
        init_tracing();
        let mut durable = MemKv::new();
        {
            let mut clob = ClobStore::new(&mut durable);
            clob.set_clob_pair(&ClobPair::btc_usd()).unwrap();
            clob.set_clob_pair(&ClobPair::eth_usd()).unwrap();
            clob.set_last_committed_block_time(NOW);
        }
        let mut scratch = MemKv::new();
        BlockStore::new(&mut scratch).begin_block(HEIGHT);
        Self {
            world: TestWorld::new(btc_eth_market(btc)),
            durable,
            scratch,
        }
    }

    /// Alice has $100,000. Bob is long 1 BTC with no quote balance.
    fn traders() -> Self {
        let mut chain = Self::new(btc_perpetual_20_10_margin());
        chain
            .world
            .ledger
            .put_subaccount(Subaccount::new(alice(), dollars(100_000)));
        chain
            .world
            .ledger
            .put_subaccount(Subaccount::new(bob(), 0).with_position(0, btc(1)));
        chain
    }

    /// Carl is short 1 BTC with `carl_quote` dollars; Dave is long 1 BTC with $50,000.
    fn carl_and_dave(carl_quote: i64) -> Self {
        let mut chain = Self::new(btc_perpetual_100_percent_margin());
        chain
            .world
            .ledger
            .put_subaccount(Subaccount::new(carl(), dollars(carl_quote)).with_position(0, -btc(1)));
        chain
            .world
            .ledger
            .put_subaccount(Subaccount::new(dave(), dollars(50_000)).with_position(0, btc(1)));
        chain
    }

    fn place_stateful(&mut self, order: &Order) {
        place_stateful_order(&deliver(), &mut ClobStore::new(&mut self.durable), order).unwrap();
    }

    fn run(&mut self, placed: &[Order], operations: &[InternalOperation]) -> Result<ProcessProposerMatchesEvents> {
        self.run_in(&deliver(), placed, operations)
    }

    fn run_in(
        &mut self,
        ctx: &BlockContext,
        placed: &[Order],
        operations: &[InternalOperation],
    ) -> Result<ProcessProposerMatchesEvents> {
        let mut clob = ClobStore::new(&mut self.durable);
        let mut block = BlockStore::new(&mut self.scratch);
        let mut deps = self.world.collaborators();
        process_operations(ctx, &mut clob, &mut block, &mut deps, placed, operations)
    }
}

fn short_term(owner: perpclob_types::SubaccountId, side: OrderSide, quantums: u64, price: u64) -> Order {
    Order::dummy_short_term(owner, 1, ClobPairId(0), side, quantums, btc_subticks(price), 15)
}

fn bob_long_term_sell() -> Order {
    Order::dummy_long_term(
        bob(),
        7,
        ClobPairId(0),
        OrderSide::Sell,
        100_000_000,
        btc_subticks(50_000),
        u32::try_from(NOW + 100).unwrap(),
    )
}

fn orders_match(taker: &Order, maker: &Order, fill_amount: u64) -> InternalOperation {
    InternalOperation::Match(ClobMatch::OrdersMatch {
        taker_order_id: taker.order_id.clone(),
        fills: vec![MakerFill {
            maker_order_id: maker.order_id.clone(),
            fill_amount,
        }],
    })
}

fn liquidate_carl(total_size: u64, is_buy: bool, fills: &[(&Order, u64)]) -> InternalOperation {
    InternalOperation::Match(ClobMatch::PerpetualLiquidation {
        liquidated: carl(),
        clob_pair_id: ClobPairId(0),
        perpetual_id: 0,
        total_size,
        is_buy,
        fills: fills
            .iter()
            .map(|(maker, fill_amount)| MakerFill {
                maker_order_id: maker.order_id.clone(),
                fill_amount: *fill_amount,
            })
            .collect(),
    })
}

fn deleverage_carl(is_final_settlement: bool) -> InternalOperation {
    InternalOperation::Match(ClobMatch::PerpetualDeleveraging {
        liquidated: carl(),
        perpetual_id: 0,
        fills: vec![DeleveragingFill {
            offsetting_subaccount_id: dave(),
            fill_amount: 100_000_000,
        }],
        is_final_settlement,
    })
}

/// Unwrap the queue position and the underlying error.
fn failed_at(result: Result<ProcessProposerMatchesEvents>) -> (usize, ClobError) {
    match result {
        Err(ClobError::OperationFailed {
            block_height,
            index,
            source,
        }) => {
            assert_eq!(block_height, HEIGHT);
            (index, *source)
        }
        other => panic!("expected a failed operation, got {other:?}"),
    }
}

// ===========================================================================
// Order matches
// ===========================================================================

#[test]
fn fully_filled_long_term_maker_is_removed() {
    let mut chain = Chain::traders();
    let maker = bob_long_term_sell();
    chain.place_stateful(&maker);
    let taker = short_term(alice(), OrderSide::Buy, 100_000_000, 50_000);

    let summary = chain
        .run(
            &[maker.clone()],
            &[
                InternalOperation::ShortTermOrderPlacement(taker.clone()),
                orders_match(&taker, &maker, 100_000_000),
            ],
        )
        .unwrap();

    assert_eq!(summary.block_height, HEIGHT);
    assert!(summary.placed_stateful_order_ids.is_empty());
    assert_eq!(
        summary.order_ids_filled_in_last_block,
        vec![taker.order_id.clone(), maker.order_id.clone()]
    );
    assert_eq!(summary.removed_stateful_order_ids, vec![maker.order_id.clone()]);

    let alice_after = chain.world.subaccount(&alice());
    assert_eq!(alice_after.quote_balance, dollars(49_975));
    assert_eq!(alice_after.position_size(0), btc(1));
    let bob_after = chain.world.subaccount(&bob());
    assert_eq!(bob_after.quote_balance, dollars(49_990));
    assert!(bob_after.position(0).is_none());

    let clob = ClobStore::new(&mut chain.durable);
    assert!(clob.get_stateful_order_placement(&maker.order_id).is_none());
    assert_eq!(clob.get_stateful_order_count(&bob()), 0);
    assert_eq!(
        chain.world.sink.events.last(),
        Some(&ClobEvent::StatefulOrderRemoved {
            order_id: maker.order_id.clone(),
            reason: RemovalReason::FullyFilled,
        })
    );
    assert_eq!(
        BlockStore::new(&mut chain.scratch)
            .get_process_proposer_matches_events()
            .unwrap(),
        summary
    );
}

#[test]
fn partially_filled_long_term_maker_stays_placed() {
    let mut chain = Chain::traders();
    let maker = bob_long_term_sell();
    chain.place_stateful(&maker);
    let taker = short_term(alice(), OrderSide::Buy, 50_000_000, 50_000);

    let summary = chain
        .run(
            &[maker.clone()],
            &[
                InternalOperation::ShortTermOrderPlacement(taker.clone()),
                orders_match(&taker, &maker, 50_000_000),
            ],
        )
        .unwrap();

    assert_eq!(summary.placed_stateful_order_ids, vec![maker.order_id.clone()]);
    assert!(summary.removed_stateful_order_ids.is_empty());
    let clob = ClobStore::new(&mut chain.durable);
    assert!(clob.get_stateful_order_placement(&maker.order_id).is_some());
    assert_eq!(clob.get_order_fill_amount(&maker.order_id).1, 50_000_000);
}

#[test]
fn taker_and_maker_restrictions() {
    let taker = short_term(alice(), OrderSide::Buy, 100_000_000, 50_000);
    let post_only = taker.clone().with_time_in_force(TimeInForce::PostOnly);
    let ioc_maker = short_term(bob(), OrderSide::Sell, 100_000_000, 50_000).with_time_in_force(TimeInForce::Ioc);
    let same_side = short_term(bob(), OrderSide::Buy, 100_000_000, 50_000);

    let mut chain = Chain::traders();
    let (index, err) = failed_at(chain.run(
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(post_only.clone()),
            orders_match(&post_only, &ioc_maker, 100_000_000),
        ],
    ));
    assert_eq!(index, 1);
    assert!(matches!(err, ClobError::PostOnlyTaker(_)));

    let mut chain = Chain::traders();
    let (index, err) = failed_at(chain.run(
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(taker.clone()),
            InternalOperation::ShortTermOrderPlacement(ioc_maker.clone()),
            orders_match(&taker, &ioc_maker, 100_000_000),
        ],
    ));
    assert_eq!(index, 2);
    assert!(matches!(err, ClobError::ImmediateMakerOrder(_)));

    let mut chain = Chain::traders();
    let (_, err) = failed_at(chain.run(
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(taker.clone()),
            InternalOperation::ShortTermOrderPlacement(same_side.clone()),
            orders_match(&taker, &same_side, 100_000_000),
        ],
    ));
    assert!(matches!(err, ClobError::SameSideMatch { .. }));
    assert_eq!(chain.world.subaccount(&alice()).quote_balance, dollars(100_000));
}

#[test]
fn unplaced_orders_are_not_found() {
    let mut chain = Chain::traders();
    let taker = short_term(alice(), OrderSide::Buy, 100_000_000, 50_000);
    let maker = bob_long_term_sell();

    let (index, err) = failed_at(chain.run(&[], &[orders_match(&taker, &maker, 100_000_000)]));
    assert_eq!(index, 0);
    assert!(matches!(err, ClobError::OrderNotFound(ref id) if *id == taker.order_id));
}

#[test]
fn short_term_placement_is_validated() {
    let mut chain = Chain::traders();
    let far = Order::dummy_short_term(alice(), 1, ClobPairId(0), OrderSide::Buy, 100, btc_subticks(50_000), HEIGHT + 21);
    let (index, err) = failed_at(chain.run(&[], &[InternalOperation::ShortTermOrderPlacement(far)]));
    assert_eq!(index, 0);
    assert!(matches!(err, ClobError::GoodTilBlockExceedsShortBlockWindow { .. }));

    let mut chain = Chain::traders();
    let (_, err) = failed_at(chain.run(
        &[],
        &[InternalOperation::ShortTermOrderPlacement(bob_long_term_sell())],
    ));
    assert!(matches!(err, ClobError::InvalidPlaceOrder { .. }));
}

// ===========================================================================
// Liquidations
// ===========================================================================

#[test]
fn queue_for_a_block_that_was_never_begun_is_rejected() {
    let mut chain = Chain::carl_and_dave(54_999);
    let maker = short_term(dave(), OrderSide::Sell, 100_000_000, 50_000);
    chain
        .run(
            &[],
            &[
                InternalOperation::ShortTermOrderPlacement(maker.clone()),
                liquidate_carl(50_000_000, true, &[(&maker, 50_000_000)]),
            ],
        )
        .unwrap();

    let next = BlockContext::deliver(HEIGHT + 1, block_time());
    let result = chain.run_in(
        &next,
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(maker.clone()),
            liquidate_carl(50_000_000, true, &[(&maker, 50_000_000)]),
        ],
    );
    assert!(matches!(
        result,
        Err(ClobError::BlockHeightMismatch { expected: 11, actual: 10 })
    ));
    assert_eq!(
        chain.world.subaccount(&carl()).position_size(0),
        BigInt::from(-50_000_000)
    );
    let summary = BlockStore::new(&mut chain.scratch)
        .get_process_proposer_matches_events()
        .unwrap();
    assert_eq!(summary.block_height, HEIGHT);
}

#[test]
fn liquidation_through_the_queue() {
    let mut chain = Chain::carl_and_dave(54_999);
    let maker = short_term(dave(), OrderSide::Sell, 100_000_000, 50_000);

    let summary = chain
        .run(
            &[],
            &[
                InternalOperation::ShortTermOrderPlacement(maker.clone()),
                liquidate_carl(100_000_000, true, &[(&maker, 100_000_000)]),
            ],
        )
        .unwrap();

    assert_eq!(summary.order_ids_filled_in_last_block, vec![maker.order_id.clone()]);
    assert_eq!(chain.world.ledger.insurance_fund(), &dollars(250));
    assert_eq!(
        chain.world.subaccount(&carl()).quote_balance,
        BigInt::from(4_749_000_000i64)
    );

    let info = BlockStore::new(&mut chain.scratch).get_subaccount_liquidation_info(&carl());
    assert_eq!(info.perpetuals_liquidated, vec![0]);
    assert_eq!(info.notional_liquidated, 50_000_000_000);
}

#[test]
fn second_liquidation_of_a_perpetual_in_one_block_is_rejected() {
    let mut chain = Chain::carl_and_dave(54_999);
    let maker = short_term(dave(), OrderSide::Sell, 100_000_000, 50_000);

    let (index, err) = failed_at(chain.run(
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(maker.clone()),
            liquidate_carl(50_000_000, true, &[(&maker, 50_000_000)]),
            liquidate_carl(50_000_000, true, &[(&maker, 50_000_000)]),
        ],
    ));
    assert_eq!(index, 2);
    assert!(matches!(
        err,
        ClobError::SubaccountHasLiquidatedPerpetual { perpetual_id: 0, .. }
    ));

    // The first liquidation was applied before the queue stopped.
    assert_eq!(
        chain.world.subaccount(&carl()).position_size(0),
        BigInt::from(-50_000_000)
    );
    assert_eq!(chain.world.subaccount(&dave()).quote_balance, dollars(74_995));
    assert!(chain.world.ledger.insurance_fund().is_positive());
}

#[test]
fn malformed_liquidation_matches() {
    let maker = short_term(dave(), OrderSide::Sell, 100_000_000, 50_000);
    let place = InternalOperation::ShortTermOrderPlacement(maker.clone());

    let mut chain = Chain::carl_and_dave(54_999);
    let (_, err) = failed_at(chain.run(
        &[],
        &[place.clone(), liquidate_carl(200_000_000, true, &[(&maker, 100_000_000)])],
    ));
    assert!(matches!(
        err,
        ClobError::InvalidLiquidationOrderTotalSize { proposed: 200_000_000, max: 100_000_000 }
    ));

    let mut chain = Chain::carl_and_dave(54_999);
    let (_, err) = failed_at(chain.run(
        &[],
        &[place.clone(), liquidate_carl(100_000_000, false, &[(&maker, 100_000_000)])],
    ));
    assert!(matches!(err, ClobError::InvalidLiquidationOrderSide { proposed_is_buy: false }));

    let mut chain = Chain::carl_and_dave(54_999);
    let (_, err) = failed_at(chain.run(
        &[],
        &[
            place.clone(),
            liquidate_carl(100_000_000, true, &[(&maker, 60_000_000), (&maker, 60_000_000)]),
        ],
    ));
    assert!(matches!(err, ClobError::InvalidMatch { .. }));

    let mut chain = Chain::carl_and_dave(54_999);
    let wrong_pair = InternalOperation::Match(ClobMatch::PerpetualLiquidation {
        liquidated: carl(),
        clob_pair_id: ClobPairId(1),
        perpetual_id: 0,
        total_size: 100_000_000,
        is_buy: true,
        fills: Vec::new(),
    });
    let (_, err) = failed_at(chain.run(&[], &[wrong_pair]));
    assert!(matches!(
        err,
        ClobError::ClobPairPerpetualMismatch { expected: 0, actual: 1, .. }
    ));

    let mut chain = Chain::carl_and_dave(150_000);
    let (_, err) = failed_at(chain.run(
        &[],
        &[place, liquidate_carl(100_000_000, true, &[(&maker, 100_000_000)])],
    ));
    assert!(matches!(err, ClobError::SubaccountNotLiquidatable(_)));
    assert!(chain.world.sink.events.is_empty());
}

#[test]
fn empty_insurance_fund_stops_the_queue() {
    let mut chain = Chain::carl_and_dave(50_499);
    let maker = short_term(dave(), OrderSide::Sell, 100_000_000, 50_500);

    let (index, err) = failed_at(chain.run(
        &[],
        &[
            InternalOperation::ShortTermOrderPlacement(maker.clone()),
            liquidate_carl(100_000_000, true, &[(&maker, 100_000_000)]),
        ],
    ));
    assert_eq!(index, 1);
    assert!(matches!(err, ClobError::InsuranceFundHasInsufficientFunds { .. }));
    assert_eq!(chain.world.subaccount(&carl()).position_size(0), -btc(1));
    assert!(
        BlockStore::new(&mut chain.scratch)
            .get_process_proposer_matches_events()
            .is_err()
    );
}

// ===========================================================================
// Deleveraging
// ===========================================================================

#[test]
fn bankrupt_subaccount_is_deleveraged_against_offsetting_position() {
    let mut chain = Chain::carl_and_dave(49_000);

    let summary = chain.run(&[], &[deleverage_carl(false)]).unwrap();
    assert!(summary.order_ids_filled_in_last_block.is_empty());

    let carl_after = chain.world.subaccount(&carl());
    assert!(carl_after.quote_balance.is_zero());
    assert!(carl_after.position(0).is_none());
    let dave_after = chain.world.subaccount(&dave());
    assert_eq!(dave_after.quote_balance, dollars(99_000));
    assert!(dave_after.position(0).is_none());
    assert!(matches!(
        chain.world.sink.events.as_slice(),
        [ClobEvent::Match { is_deleverage: true, fill_amount: 100_000_000, .. }]
    ));
}

#[test]
fn deleveraging_eligibility_is_checked() {
    let mut chain = Chain::carl_and_dave(49_000);
    let (_, err) = failed_at(chain.run(&[], &[deleverage_carl(true)]));
    assert!(matches!(
        err,
        ClobError::DeleveragingIsFinalSettlementFlagMismatch { proposed: true, expected: false }
    ));

    let mut chain = Chain::carl_and_dave(60_000);
    let (_, err) = failed_at(chain.run(&[], &[deleverage_carl(false)]));
    assert!(matches!(err, ClobError::InvalidDeleveragedSubaccount { perpetual_id: 0, .. }));
    assert_eq!(chain.world.subaccount(&dave()).position_size(0), btc(1));
}

// ===========================================================================
// Removals and block lifecycle
// ===========================================================================

#[test]
fn removal_drops_a_same_block_placement_from_the_summary() {
    let mut chain = Chain::traders();
    let order = bob_long_term_sell();
    chain.place_stateful(&order);

    let summary = chain
        .run(
            &[order.clone()],
            &[InternalOperation::OrderRemoval {
                order_id: order.order_id.clone(),
                reason: RemovalReason::Undercollateralized,
            }],
        )
        .unwrap();

    assert!(summary.placed_stateful_order_ids.is_empty());
    assert_eq!(summary.removed_stateful_order_ids, vec![order.order_id.clone()]);
    assert_eq!(
        chain.world.sink.events,
        vec![ClobEvent::StatefulOrderRemoved {
            order_id: order.order_id,
            reason: RemovalReason::Undercollateralized,
        }]
    );
}

#[test]
fn removing_an_unknown_stateful_order_fails() {
    let mut chain = Chain::traders();
    let order = bob_long_term_sell();
    let (_, err) = failed_at(chain.run(
        &[],
        &[InternalOperation::OrderRemoval {
            order_id: order.order_id.clone(),
            reason: RemovalReason::Unspecified,
        }],
    ));
    assert!(matches!(err, ClobError::StatefulOrderDoesNotExist(_)));
}

#[test]
fn end_block_extends_the_queue_summary() {
    let mut chain = Chain::traders();
    let maker = bob_long_term_sell();
    chain.place_stateful(&maker);
    let taker = short_term(alice(), OrderSide::Buy, 100_000_000, 50_000);
    chain
        .run(
            &[maker.clone()],
            &[
                InternalOperation::ShortTermOrderPlacement(taker.clone()),
                orders_match(&taker, &maker, 100_000_000),
            ],
        )
        .unwrap();

    let mut clob = ClobStore::new(&mut chain.durable);
    let mut block = BlockStore::new(&mut chain.scratch);
    let summary = end_block(&deliver(), &mut clob, &mut block).unwrap();
    assert_eq!(summary.removed_stateful_order_ids, vec![maker.order_id]);
    assert!(summary.expired_stateful_order_ids.is_empty());
    assert_eq!(clob.get_last_committed_block_time(), NOW + 5);
}

#[test]
#[should_panic(expected = "CLOB_FAULT_08")]
fn preexisting_stateful_order_operation_is_a_fault() {
    let mut chain = Chain::traders();
    let order = bob_long_term_sell();
    let _ = chain.run(&[], &[InternalOperation::PreexistingStatefulOrder(order.order_id)]);
}

#[test]
#[should_panic(expected = "CLOB_FAULT_11")]
fn queue_only_runs_in_deliver_mode() {
    let mut chain = Chain::traders();
    let _ = chain.run_in(&BlockContext::check(HEIGHT, block_time()), &[], &[]);
}
