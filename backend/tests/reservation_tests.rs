//! Reservation consumption tests for the Tile Stock Management Platform
//!
//! Properties of the pure consumption planner applied when a confirmed exit
//! or manual removal uses up an order's reserved quantity on a lot.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use tsm_backend::services::reservation::{
    plan_reservation_consumption, ReservationChange, ReservationSnapshot,
};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn reservations_from(quantities: &[u32]) -> Vec<ReservationSnapshot> {
    let mut snapshots: Vec<ReservationSnapshot> = quantities
        .iter()
        .filter(|q| **q > 0)
        .map(|q| ReservationSnapshot {
            id: Uuid::new_v4(),
            quantity: Decimal::from(*q),
        })
        .collect();
    // Callers feed the planner smallest-first
    snapshots.sort_by_key(|s| s.quantity);
    snapshots
}

fn consumed_total(
    reservations: &[ReservationSnapshot],
    changes: &[ReservationChange],
) -> Decimal {
    changes
        .iter()
        .map(|change| match change {
            ReservationChange::Consume(id) => {
                reservations.iter().find(|r| r.id == *id).unwrap().quantity
            }
            ReservationChange::Shrink { id, new_quantity } => {
                reservations.iter().find(|r| r.id == *id).unwrap().quantity - *new_quantity
            }
        })
        .sum()
}

// ============================================================================
// Property 1: Consumption Conservation
// ============================================================================
// The quantity taken out of reservations equals the deducted amount, capped
// by the total actively reserved.

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 1: consumed quantity = min(amount, total reserved)
    #[test]
    fn property_1_consumption_conservation(
        quantities in prop::collection::vec(0u32..100, 0..8),
        amount in 0u32..500,
    ) {
        let reservations = reservations_from(&quantities);
        let amount = Decimal::from(amount);
        let total: Decimal = reservations.iter().map(|r| r.quantity).sum();

        let changes = plan_reservation_consumption(&reservations, amount);
        let consumed = consumed_total(&reservations, &changes);

        prop_assert_eq!(consumed, amount.min(total));
    }

    /// Property 2: at most one reservation shrinks, and it comes last
    #[test]
    fn property_2_at_most_one_shrink_and_last(
        quantities in prop::collection::vec(1u32..100, 1..8),
        amount in 1u32..500,
    ) {
        let reservations = reservations_from(&quantities);
        let changes = plan_reservation_consumption(&reservations, Decimal::from(amount));

        let shrinks = changes
            .iter()
            .filter(|c| matches!(c, ReservationChange::Shrink { .. }))
            .count();
        prop_assert!(shrinks <= 1);

        if shrinks == 1 {
            prop_assert!(
                matches!(changes.last(), Some(ReservationChange::Shrink { .. })),
                "last change must be a Shrink"
            );
        }
    }

    /// Property 3: a shrunk reservation keeps a positive remainder
    #[test]
    fn property_3_shrink_leaves_positive_quantity(
        quantities in prop::collection::vec(1u32..100, 1..8),
        amount in 1u32..500,
    ) {
        let reservations = reservations_from(&quantities);
        let changes = plan_reservation_consumption(&reservations, Decimal::from(amount));

        for change in &changes {
            if let ReservationChange::Shrink { new_quantity, .. } = change {
                prop_assert!(*new_quantity > Decimal::ZERO);
            }
        }
    }

    /// Property 4: no reservation is touched twice
    #[test]
    fn property_4_each_reservation_once(
        quantities in prop::collection::vec(1u32..100, 1..8),
        amount in 1u32..500,
    ) {
        let reservations = reservations_from(&quantities);
        let changes = plan_reservation_consumption(&reservations, Decimal::from(amount));

        let mut ids: Vec<Uuid> = changes
            .iter()
            .map(|c| match c {
                ReservationChange::Consume(id) => *id,
                ReservationChange::Shrink { id, .. } => *id,
            })
            .collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), changes.len());
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[test]
fn test_exact_consumption_flips_to_consumed() {
    let reservations = reservations_from(&[30]);
    let changes = plan_reservation_consumption(&reservations, dec("30"));
    assert_eq!(changes, vec![ReservationChange::Consume(reservations[0].id)]);
}

#[test]
fn test_partial_consumption_shrinks() {
    let reservations = reservations_from(&[30]);
    let changes = plan_reservation_consumption(&reservations, dec("10"));
    assert_eq!(
        changes,
        vec![ReservationChange::Shrink {
            id: reservations[0].id,
            new_quantity: dec("20"),
        }]
    );
}

#[test]
fn test_over_consumption_consumes_everything() {
    let reservations = reservations_from(&[10, 20]);
    let changes = plan_reservation_consumption(&reservations, dec("100"));
    assert_eq!(changes.len(), 2);
    assert!(changes
        .iter()
        .all(|c| matches!(c, ReservationChange::Consume(_))));
}

#[test]
fn test_smallest_reservation_goes_first() {
    let reservations = reservations_from(&[50, 5]);
    // sorted smallest-first: [5, 50]
    let changes = plan_reservation_consumption(&reservations, dec("20"));
    assert_eq!(changes[0], ReservationChange::Consume(reservations[0].id));
    assert_eq!(
        changes[1],
        ReservationChange::Shrink {
            id: reservations[1].id,
            new_quantity: dec("35"),
        }
    );
}
