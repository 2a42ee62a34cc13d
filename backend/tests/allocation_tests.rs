//! Allocation engine tests for the Tile Stock Management Platform
//!
//! Properties of the pure lot-choice and fulfillment classification rules:
//! the lot-integrity rule (one lot fully covers a line or nothing is
//! reserved) and the status projection driven by allocation outcomes.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use tsm_backend::models::{FulfillmentStatus, OrderStatus};
use tsm_backend::services::allocation::{
    choose_lot, classify_fulfillment, next_order_status, LineOutcome, LotChoice, LotHeadroom,
};

fn headroom_lots(pairs: &[(u32, u32)]) -> Vec<LotHeadroom> {
    pairs
        .iter()
        .map(|(quantity, reserved)| LotHeadroom {
            id: Uuid::new_v4(),
            quantity: Decimal::from(*quantity),
            reserved: Decimal::from(*reserved),
        })
        .collect()
}

// ============================================================================
// Property 1: Lot Integrity
// ============================================================================
// choose_lot never proposes a lot that cannot cover the whole line, and a
// Single choice always has enough free headroom.

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 1: a chosen lot always covers the full needed quantity
    #[test]
    fn property_1_single_choice_covers_line(
        lots in prop::collection::vec((0u32..200, 0u32..200), 0..8),
        needed in 1u32..300,
    ) {
        let lots = headroom_lots(&lots);
        let needed = Decimal::from(needed);

        if let LotChoice::Single(lot_id) = choose_lot(&lots, needed) {
            let lot = lots.iter().find(|l| l.id == lot_id).unwrap();
            prop_assert!(lot.free() >= needed);
        }
    }

    /// Property 2: the classification of shortages is consistent with the
    /// aggregate free headroom
    #[test]
    fn property_2_shortage_classification_consistent(
        lots in prop::collection::vec((0u32..200, 0u32..200), 0..8),
        needed in 1u32..600,
    ) {
        let lots = headroom_lots(&lots);
        let needed = Decimal::from(needed);
        let total_free: Decimal = lots
            .iter()
            .map(|l| l.free().max(Decimal::ZERO))
            .sum();

        match choose_lot(&lots, needed) {
            LotChoice::Single(_) => {}
            LotChoice::MixedLotShortage => prop_assert!(total_free >= needed),
            LotChoice::Shortage => prop_assert!(total_free < needed),
        }
    }

    /// Property 3: FIFO preference — the chosen lot is the first candidate
    /// able to cover the line
    #[test]
    fn property_3_first_sufficient_lot_wins(
        lots in prop::collection::vec((0u32..200, 0u32..200), 1..8),
        needed in 1u32..150,
    ) {
        let lots = headroom_lots(&lots);
        let needed = Decimal::from(needed);

        if let LotChoice::Single(lot_id) = choose_lot(&lots, needed) {
            let chosen_index = lots.iter().position(|l| l.id == lot_id).unwrap();
            for lot in &lots[..chosen_index] {
                prop_assert!(lot.free() < needed, "an earlier lot could have covered the line");
            }
        }
    }
}

// ============================================================================
// Fulfillment classification
// ============================================================================

#[test]
fn test_all_lines_satisfied_means_in_picking() {
    let outcomes = vec![LineOutcome::Satisfied; 3];
    assert_eq!(classify_fulfillment(&outcomes), FulfillmentStatus::InPicking);
}

#[test]
fn test_any_satisfied_line_means_partial() {
    let outcomes = vec![
        LineOutcome::Satisfied,
        LineOutcome::MixedLotShortage,
        LineOutcome::Shortage,
    ];
    assert_eq!(
        classify_fulfillment(&outcomes),
        FulfillmentStatus::PartiallyFulfilled
    );
}

#[test]
fn test_mixed_lot_without_any_reservation_awaits_picking() {
    let outcomes = vec![LineOutcome::MixedLotShortage, LineOutcome::Shortage];
    assert_eq!(
        classify_fulfillment(&outcomes),
        FulfillmentStatus::AwaitingPicking
    );
}

#[test]
fn test_pure_shortage_awaits_stock() {
    let outcomes = vec![LineOutcome::Shortage, LineOutcome::Shortage];
    assert_eq!(
        classify_fulfillment(&outcomes),
        FulfillmentStatus::AwaitingStock
    );
}

#[test]
fn test_empty_order_stays_pending() {
    assert_eq!(classify_fulfillment(&[]), FulfillmentStatus::Pending);
}

// ============================================================================
// Order status projection
// ============================================================================

#[test]
fn test_fully_allocated_paid_order_goes_to_picking() {
    assert_eq!(
        next_order_status(OrderStatus::Paid, FulfillmentStatus::InPicking, false),
        Some(OrderStatus::Picking)
    );
    assert_eq!(
        next_order_status(OrderStatus::Paid, FulfillmentStatus::InPicking, true),
        Some(OrderStatus::Picking)
    );
}

#[test]
fn test_short_paid_order_waits_on_purchase_pipeline() {
    assert_eq!(
        next_order_status(OrderStatus::Paid, FulfillmentStatus::AwaitingStock, true),
        Some(OrderStatus::AwaitingArrival)
    );
    assert_eq!(
        next_order_status(
            OrderStatus::Paid,
            FulfillmentStatus::PartiallyFulfilled,
            false
        ),
        Some(OrderStatus::AwaitingPurchase)
    );
}

// ============================================================================
// Property 4: Allocation Idempotence
// ============================================================================
// An allocation pass mirrors the engine: per line, needed = demand minus the
// quantity already reserved for that line; a Single choice books a
// reservation against the chosen lot. Re-running the pass with no stock
// change must book nothing new and classify identically.

#[derive(Debug, Clone)]
struct Line {
    demand: Decimal,
    reserved: Decimal,
}

fn allocate_pass(lots: &mut Vec<LotHeadroom>, lines: &mut [Line]) -> (FulfillmentStatus, usize) {
    let mut outcomes = Vec::with_capacity(lines.len());
    let mut created = 0;

    for line in lines.iter_mut() {
        let needed = line.demand - line.reserved;
        if needed <= Decimal::ZERO {
            outcomes.push(LineOutcome::Satisfied);
            continue;
        }

        match choose_lot(lots, needed) {
            LotChoice::Single(lot_id) => {
                let lot = lots.iter_mut().find(|l| l.id == lot_id).unwrap();
                lot.reserved += needed;
                line.reserved += needed;
                created += 1;
                outcomes.push(LineOutcome::Satisfied);
            }
            LotChoice::MixedLotShortage => outcomes.push(LineOutcome::MixedLotShortage),
            LotChoice::Shortage => outcomes.push(LineOutcome::Shortage),
        }
    }

    (classify_fulfillment(&outcomes), created)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 4: a second pass with no intervening stock change reserves
    /// nothing and reaches the same fulfillment status
    #[test]
    fn property_4_second_pass_is_a_no_op(
        lot_quantities in prop::collection::vec(0u32..200, 0..6),
        demands in prop::collection::vec(1u32..150, 1..5),
    ) {
        let mut lots: Vec<LotHeadroom> = lot_quantities
            .iter()
            .map(|q| LotHeadroom {
                id: Uuid::new_v4(),
                quantity: Decimal::from(*q),
                reserved: Decimal::ZERO,
            })
            .collect();
        let mut lines: Vec<Line> = demands
            .iter()
            .map(|d| Line {
                demand: Decimal::from(*d),
                reserved: Decimal::ZERO,
            })
            .collect();

        let (first_status, _) = allocate_pass(&mut lots, &mut lines);
        let lots_after_first = lots.clone();

        let (second_status, second_created) = allocate_pass(&mut lots, &mut lines);

        prop_assert_eq!(second_created, 0);
        prop_assert_eq!(second_status, first_status);
        prop_assert_eq!(lots, lots_after_first);
    }
}

#[test]
fn test_fully_reserved_line_skips_lot_search() {
    // No lots at all, yet a line already covered by reservations stays
    // satisfied; only the unmet remainder ever consults stock.
    let mut lots: Vec<LotHeadroom> = Vec::new();
    let mut lines = vec![Line {
        demand: Decimal::from(10),
        reserved: Decimal::from(10),
    }];

    let (status, created) = allocate_pass(&mut lots, &mut lines);
    assert_eq!(status, FulfillmentStatus::InPicking);
    assert_eq!(created, 0);
}

#[test]
fn test_non_paid_orders_are_untouched() {
    for status in [
        OrderStatus::Created,
        OrderStatus::Picking,
        OrderStatus::ReadyForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ] {
        assert_eq!(
            next_order_status(status, FulfillmentStatus::InPicking, false),
            None
        );
    }
}
