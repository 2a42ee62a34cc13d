//! FIFO deduction planner tests for the Tile Stock Management Platform
//!
//! Properties of the pure lot-deduction planner used by exits, manual
//! removals and negative adjustments.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use tsm_backend::services::stock::{plan_fifo_deductions, LotSnapshot};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn lots_from(quantities: &[u32]) -> Vec<LotSnapshot> {
    quantities
        .iter()
        .map(|q| LotSnapshot {
            id: Uuid::new_v4(),
            quantity: Decimal::from(*q),
        })
        .collect()
}

// ============================================================================
// Property 1: Deduction Conservation
// ============================================================================
// When planning succeeds, the planned deductions sum exactly to the
// requested quantity.

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 1: planned deductions sum to the request
    #[test]
    fn property_1_deductions_sum_to_request(
        quantities in prop::collection::vec(0u32..500, 1..10),
        requested in 1u32..1000,
    ) {
        let lots = lots_from(&quantities);
        let requested = Decimal::from(requested);

        if let Ok(plan) = plan_fifo_deductions(&lots, requested) {
            let planned: Decimal = plan.iter().map(|d| d.quantity).sum();
            prop_assert_eq!(planned, requested);
        }
    }

    /// Property 2: no deduction exceeds its lot's quantity, and no lot is
    /// planned twice
    #[test]
    fn property_2_deductions_respect_lot_bounds(
        quantities in prop::collection::vec(0u32..500, 1..10),
        requested in 1u32..1000,
    ) {
        let lots = lots_from(&quantities);
        let requested = Decimal::from(requested);

        if let Ok(plan) = plan_fifo_deductions(&lots, requested) {
            for deduction in &plan {
                let lot = lots.iter().find(|l| l.id == deduction.lot_id).unwrap();
                prop_assert!(deduction.quantity > Decimal::ZERO);
                prop_assert!(deduction.quantity <= lot.quantity);
            }
            let mut ids: Vec<_> = plan.iter().map(|d| d.lot_id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), plan.len(), "a lot was planned twice");
        }
    }

    /// Property 3: all-or-nothing — planning fails exactly when the total
    /// available is below the request, and the error reports both figures
    #[test]
    fn property_3_shortage_is_exact(
        quantities in prop::collection::vec(0u32..500, 0..10),
        requested in 1u32..2000,
    ) {
        let lots = lots_from(&quantities);
        let requested = Decimal::from(requested);
        let available: Decimal = lots.iter().map(|l| l.quantity).sum();

        match plan_fifo_deductions(&lots, requested) {
            Ok(_) => prop_assert!(available >= requested),
            Err(shortage) => {
                prop_assert!(available < requested);
                prop_assert_eq!(shortage.available, available);
                prop_assert_eq!(shortage.requested, requested);
            }
        }
    }

    /// Property 4: FIFO order — every lot before the last planned one is
    /// drained completely (candidates are consumed front to back)
    #[test]
    fn property_4_earlier_lots_drained_first(
        quantities in prop::collection::vec(1u32..500, 1..10),
        requested in 1u32..1000,
    ) {
        let lots = lots_from(&quantities);
        let requested = Decimal::from(requested);

        if let Ok(plan) = plan_fifo_deductions(&lots, requested) {
            for (index, deduction) in plan.iter().enumerate() {
                let lot = lots.iter().find(|l| l.id == deduction.lot_id).unwrap();
                if index + 1 < plan.len() {
                    prop_assert_eq!(
                        deduction.quantity, lot.quantity,
                        "a non-final planned lot was not fully drained"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[test]
fn test_exact_single_lot() {
    let lots = lots_from(&[50]);
    let plan = plan_fifo_deductions(&lots, dec("50")).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].quantity, dec("50"));
}

#[test]
fn test_spans_two_lots() {
    let lots = lots_from(&[30, 40]);
    let plan = plan_fifo_deductions(&lots, dec("45")).unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].quantity, dec("30"));
    assert_eq!(plan[1].quantity, dec("15"));
}

#[test]
fn test_over_draw_fails_without_plan() {
    let lots = lots_from(&[20]);
    let err = plan_fifo_deductions(&lots, dec("25")).unwrap_err();
    assert_eq!(err.available, dec("20"));
    assert_eq!(err.requested, dec("25"));
}

#[test]
fn test_fractional_quantities() {
    let lots = vec![
        LotSnapshot {
            id: Uuid::new_v4(),
            quantity: dec("10.5"),
        },
        LotSnapshot {
            id: Uuid::new_v4(),
            quantity: dec("2.25"),
        },
    ];
    let plan = plan_fifo_deductions(&lots, dec("11.75")).unwrap();
    assert_eq!(plan[0].quantity, dec("10.5"));
    assert_eq!(plan[1].quantity, dec("1.25"));
}
