//! Order validation against durable state, and stateful order placement and removal.

use perpclob_state::ClobStore;
use perpclob_types::constants::{
    MAX_STATEFUL_ORDERS_PER_SUBACCOUNT, SHORT_BLOCK_WINDOW, STATEFUL_ORDER_TIME_WINDOW_SECS,
};
use perpclob_types::{
    BlockContext, ClobError, ClobEvent, Collaborators, Order, OrderId, RemovalReason, Result,
};

/// Validate an order against its clob pair and the current block.
///
/// Short-term orders must satisfy `height <= good_til_block <= height + SHORT_BLOCK_WINDOW`.
/// Stateful orders must expire after the last committed block time and no
/// later than the stateful order time window; a new placement must also
/// outrank any existing placement of the same id.
///
/// # Errors
/// - [`ClobError::ClobPairNotFound`] for an unknown pair
/// - [`ClobError::InvalidPlaceOrder`] for a misaligned price or size
/// - good-til errors (`CLOB_ERR_102` to `CLOB_ERR_105`, `CLOB_ERR_108`)
/// - [`ClobError::StatefulOrderAlreadyExists`] for a lower-priority replacement
pub fn perform_stateful_order_validation(
    clob: &ClobStore<'_>,
    order: &Order,
    block_height: u32,
    is_preexisting: bool,
) -> Result<()> {
    let clob_pair = clob.must_get_clob_pair(order.clob_pair_id())?;

    if order.subticks % u64::from(clob_pair.subticks_per_tick) != 0 {
        return Err(ClobError::InvalidPlaceOrder {
            reason: format!(
                "subticks {} must be a multiple of subticks per tick {}",
                order.subticks, clob_pair.subticks_per_tick
            ),
        });
    }
    if order.quantums < clob_pair.min_order_base_quantums {
        return Err(ClobError::InvalidPlaceOrder {
            reason: format!(
                "quantums {} is below the minimum order size {}",
                order.quantums, clob_pair.min_order_base_quantums
            ),
        });
    }
    if order.quantums % clob_pair.step_base_quantums != 0 {
        return Err(ClobError::InvalidPlaceOrder {
            reason: format!(
                "quantums {} must be a multiple of step size {}",
                order.quantums, clob_pair.step_base_quantums
            ),
        });
    }

    if order.order_id.is_short_term() {
        let good_til_block = order.good_til_block()?;
        if good_til_block < block_height {
            return Err(ClobError::HeightExceedsGoodTilBlock {
                good_til_block,
                height: block_height,
            });
        }
        if good_til_block > block_height.saturating_add(SHORT_BLOCK_WINDOW) {
            return Err(ClobError::GoodTilBlockExceedsShortBlockWindow {
                good_til_block,
                height: block_height,
                window: SHORT_BLOCK_WINDOW,
            });
        }
        return Ok(());
    }

    let good_til_block_time = order.good_til_block_time()?;
    let previous_block_time = clob.get_last_committed_block_time();
    if i64::from(good_til_block_time) <= previous_block_time {
        return Err(ClobError::TimeExceedsGoodTilBlockTime {
            good_til_block_time,
            previous_block_time,
        });
    }
    let end_time = previous_block_time + STATEFUL_ORDER_TIME_WINDOW_SECS;
    if i64::from(good_til_block_time) > end_time {
        return Err(ClobError::GoodTilBlockTimeExceedsStatefulOrderTimeWindow {
            good_til_block_time,
            end_time,
        });
    }

    if is_preexisting {
        return Ok(());
    }
    match clob.get_stateful_order_placement(&order.order_id) {
        Some(existing) if !order.can_replace(&existing.order) => {
            Err(ClobError::StatefulOrderAlreadyExists {
                order_id: order.order_id.clone(),
            })
        }
        _ => Ok(()),
    }
}

/// Validate and persist a long-term or conditional order placed in this block.
///
/// A replacement keeps the subaccount's order count; a new order must fit
/// under [`MAX_STATEFUL_ORDERS_PER_SUBACCOUNT`].
pub fn place_stateful_order(ctx: &BlockContext, clob: &mut ClobStore<'_>, order: &Order) -> Result<()> {
    ctx.assert_deliver_mode();
    if !order.order_id.is_stateful() {
        return Err(ClobError::InvalidPlaceOrder {
            reason: format!("{} is not a stateful order", order.order_id),
        });
    }
    perform_stateful_order_validation(clob, order, ctx.height, false)?;

    let subaccount = order.subaccount_id();
    let is_replacement = clob.get_stateful_order_placement(&order.order_id).is_some();
    if !is_replacement && clob.get_stateful_order_count(subaccount) >= MAX_STATEFUL_ORDERS_PER_SUBACCOUNT {
        return Err(ClobError::StatefulOrderCountExceeded {
            subaccount: subaccount.clone(),
            limit: MAX_STATEFUL_ORDERS_PER_SUBACCOUNT,
        });
    }

    clob.set_stateful_order_placement(order, ctx.height);
    tracing::debug!(
        order_id = %order.order_id,
        order_hash = %order.hash(),
        is_replacement,
        "Placed stateful order"
    );
    Ok(())
}

/// Remove a stateful order and emit a removal event.
///
/// # Errors
/// [`ClobError::StatefulOrderDoesNotExist`] if the order is not in durable state.
///
/// # Panics
/// Panics unless `ctx` is in deliver mode, and on a short-term order id.
pub fn remove_stateful_order(
    ctx: &BlockContext,
    clob: &mut ClobStore<'_>,
    deps: &mut Collaborators<'_>,
    order_id: &OrderId,
    reason: RemovalReason,
) -> Result<()> {
    ctx.assert_deliver_mode();
    order_id.must_be_stateful();
    if clob.get_stateful_order_placement(order_id).is_none() {
        return Err(ClobError::StatefulOrderDoesNotExist(order_id.clone()));
    }
    clob.must_remove_stateful_order(order_id);
    tracing::debug!(%order_id, ?reason, "Removed stateful order");
    deps.emit(ClobEvent::StatefulOrderRemoved {
        order_id: order_id.clone(),
        reason,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use perpclob_state::MemKv;
    use perpclob_types::testing::*;
    use perpclob_types::{ClobPair, ClobPairId, OrderSide};

    const NOW: i64 = 1_700_000_000;

    fn seeded(kv: &mut MemKv) -> ClobStore<'_> {
        let mut clob = ClobStore::new(kv);
        clob.set_clob_pair(&ClobPair::btc_usd()).unwrap();
        clob.set_last_committed_block_time(NOW);
        clob
    }

    fn ctx(height: u32) -> BlockContext {
        BlockContext::deliver(height, Utc.timestamp_opt(NOW + 1, 0).unwrap())
    }

    fn long_term(client_id: u32, gtbt: i64) -> Order {
        Order::dummy_long_term(
            alice(),
            client_id,
            ClobPairId(0),
            OrderSide::Buy,
            1_000,
            btc_subticks(50_000),
            u32::try_from(gtbt).unwrap(),
        )
    }

    fn short_term(quantums: u64, subticks: u64, gtb: u32) -> Order {
        Order::dummy_short_term(alice(), 1, ClobPairId(0), OrderSide::Buy, quantums, subticks, gtb)
    }

    // ===========================================================================
    // Validation
    // ===========================================================================

    #[test]
    fn short_term_window() {
        let mut kv = MemKv::new();
        let clob = seeded(&mut kv);
        let price = btc_subticks(50_000);

        assert!(perform_stateful_order_validation(&clob, &short_term(100, price, 10), 10, false).is_ok());
        assert!(perform_stateful_order_validation(&clob, &short_term(100, price, 30), 10, false).is_ok());
        assert!(matches!(
            perform_stateful_order_validation(&clob, &short_term(100, price, 9), 10, false),
            Err(ClobError::HeightExceedsGoodTilBlock { good_til_block: 9, height: 10 })
        ));
        assert!(matches!(
            perform_stateful_order_validation(&clob, &short_term(100, price, 31), 10, false),
            Err(ClobError::GoodTilBlockExceedsShortBlockWindow { window: 20, .. })
        ));
    }

    #[test]
    fn price_and_size_alignment() {
        let mut kv = MemKv::new();
        let clob = seeded(&mut kv);
        let price = btc_subticks(50_000);

        for order in [
            short_term(100, price + 1, 10),
            short_term(5, price, 10),
            short_term(105, price, 10),
        ] {
            assert!(matches!(
                perform_stateful_order_validation(&clob, &order, 10, false),
                Err(ClobError::InvalidPlaceOrder { .. })
            ));
        }

        let mut unknown_pair = short_term(100, price, 10);
        unknown_pair.order_id.clob_pair_id = ClobPairId(7);
        assert!(matches!(
            perform_stateful_order_validation(&clob, &unknown_pair, 10, false),
            Err(ClobError::ClobPairNotFound(ClobPairId(7)))
        ));
    }

    #[test]
    fn stateful_time_window() {
        let mut kv = MemKv::new();
        let clob = seeded(&mut kv);

        assert!(perform_stateful_order_validation(&clob, &long_term(1, NOW + 60), 10, false).is_ok());
        assert!(matches!(
            perform_stateful_order_validation(&clob, &long_term(1, NOW), 10, false),
            Err(ClobError::TimeExceedsGoodTilBlockTime { .. })
        ));
        let too_far = NOW + STATEFUL_ORDER_TIME_WINDOW_SECS + 1;
        assert!(matches!(
            perform_stateful_order_validation(&clob, &long_term(1, too_far), 10, false),
            Err(ClobError::GoodTilBlockTimeExceedsStatefulOrderTimeWindow { .. })
        ));
    }

    // ===========================================================================
    // Placement and removal
    // ===========================================================================

    #[test]
    fn replacement_needs_higher_priority() {
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);

        place_stateful_order(&ctx(10), &mut clob, &long_term(1, NOW + 60)).unwrap();
        assert!(matches!(
            place_stateful_order(&ctx(10), &mut clob, &long_term(1, NOW + 30)),
            Err(ClobError::StatefulOrderAlreadyExists { .. })
        ));
        // Preexisting orders are not checked against themselves.
        assert!(perform_stateful_order_validation(&clob, &long_term(1, NOW + 60), 11, true).is_ok());

        place_stateful_order(&ctx(11), &mut clob, &long_term(1, NOW + 90)).unwrap();
        assert_eq!(clob.get_stateful_order_count(&alice()), 1);
        let placement = clob
            .get_stateful_order_placement(&long_term(1, NOW + 90).order_id)
            .unwrap();
        assert_eq!(placement.block_height, 11);
    }

    #[test]
    fn order_count_is_capped() {
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);
        for client_id in 0..MAX_STATEFUL_ORDERS_PER_SUBACCOUNT {
            place_stateful_order(&ctx(10), &mut clob, &long_term(client_id, NOW + 60)).unwrap();
        }
        assert!(matches!(
            place_stateful_order(
                &ctx(10),
                &mut clob,
                &long_term(MAX_STATEFUL_ORDERS_PER_SUBACCOUNT, NOW + 60)
            ),
            Err(ClobError::StatefulOrderCountExceeded { limit: 20, .. })
        ));
        // Replacing an existing order still works at the cap.
        place_stateful_order(&ctx(10), &mut clob, &long_term(0, NOW + 120)).unwrap();
    }

    #[test]
    fn short_term_orders_cannot_be_placed_statefully() {
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);
        assert!(matches!(
            place_stateful_order(&ctx(10), &mut clob, &short_term(100, btc_subticks(50_000), 12)),
            Err(ClobError::InvalidPlaceOrder { .. })
        ));
    }

    #[test]
    fn removal_emits_event() {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_20_10_margin()));
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);
        let order = long_term(3, NOW + 60);
        place_stateful_order(&ctx(10), &mut clob, &order).unwrap();

        let mut deps = world.collaborators();
        remove_stateful_order(&ctx(10), &mut clob, &mut deps, &order.order_id, RemovalReason::Undercollateralized)
            .unwrap();
        assert!(matches!(
            remove_stateful_order(&ctx(10), &mut clob, &mut deps, &order.order_id, RemovalReason::Unspecified),
            Err(ClobError::StatefulOrderDoesNotExist(_))
        ));
        drop(deps);

        assert_eq!(clob.get_stateful_order_count(&alice()), 0);
        assert_eq!(
            world.sink.events,
            vec![ClobEvent::StatefulOrderRemoved {
                order_id: order.order_id,
                reason: RemovalReason::Undercollateralized
            }]
        );
    }

    #[test]
    #[should_panic(expected = "CLOB_FAULT_09")]
    fn removing_a_short_term_order_is_a_fault() {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_20_10_margin()));
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);
        let mut deps = world.collaborators();
        let order = short_term(100, btc_subticks(50_000), 12);
        let _ = remove_stateful_order(&ctx(10), &mut clob, &mut deps, &order.order_id, RemovalReason::Unspecified);
    }

    #[test]
    #[should_panic(expected = "CLOB_FAULT_11")]
    fn removal_outside_deliver_mode_is_a_fault() {
        let mut world = TestWorld::new(btc_eth_market(btc_perpetual_20_10_margin()));
        let mut kv = MemKv::new();
        let mut clob = seeded(&mut kv);
        let order = long_term(3, NOW + 60);
        place_stateful_order(&ctx(10), &mut clob, &order).unwrap();

        let mut deps = world.collaborators();
        let check = BlockContext::check(10, Utc.timestamp_opt(NOW, 0).unwrap());
        let _ = remove_stateful_order(&check, &mut clob, &mut deps, &order.order_id, RemovalReason::Unspecified);
    }
}
