//! Ledger balance tests for the Tile Stock Management Platform
//!
//! Simulates sequences of receipts, FIFO withdrawals and adjustments over an
//! in-memory lot store, recording signed movements the way the ledger does:
//! IN and OUT rows carry positive magnitudes, ADJUST rows carry the signed
//! delta. After any sequence, every lot's quantity must equal the sum of its
//! signed movements, and no lot may ever go negative.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use tsm_backend::services::stock::{plan_fifo_deductions, LotSnapshot};

#[derive(Debug, Clone)]
enum Op {
    /// Receive quantity into the lot at the given index (creating it lazily)
    Receive { lot: usize, quantity: u32 },
    /// FIFO withdrawal across all lots
    Withdraw { quantity: u32 },
    /// Signed adjustment against one lot
    Adjust { lot: usize, delta: i32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 1u32..100).prop_map(|(lot, quantity)| Op::Receive { lot, quantity }),
        (1u32..150).prop_map(|quantity| Op::Withdraw { quantity }),
        (0usize..4, -80i32..80).prop_map(|(lot, delta)| Op::Adjust { lot, delta }),
    ]
}

#[derive(Debug, Default)]
struct Ledger {
    /// (lot id, current quantity), insertion order = FIFO order
    lots: Vec<(Uuid, Decimal)>,
    /// (lot id, signed quantity)
    movements: Vec<(Uuid, Decimal)>,
}

impl Ledger {
    fn lot_id(&mut self, index: usize) -> Uuid {
        while self.lots.len() <= index {
            self.lots.push((Uuid::new_v4(), Decimal::ZERO));
        }
        self.lots[index].0
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::Receive { lot, quantity } => {
                let quantity = Decimal::from(*quantity);
                let id = self.lot_id(*lot);
                let slot = self.lots.iter_mut().find(|(i, _)| *i == id).unwrap();
                slot.1 += quantity;
                self.movements.push((id, quantity));
            }
            Op::Withdraw { quantity } => {
                let quantity = Decimal::from(*quantity);
                let snapshots: Vec<LotSnapshot> = self
                    .lots
                    .iter()
                    .filter(|(_, q)| *q > Decimal::ZERO)
                    .map(|(id, q)| LotSnapshot {
                        id: *id,
                        quantity: *q,
                    })
                    .collect();

                // Over-draws fail atomically with no lot mutation
                if let Ok(plan) = plan_fifo_deductions(&snapshots, quantity) {
                    for deduction in plan {
                        let slot = self
                            .lots
                            .iter_mut()
                            .find(|(id, _)| *id == deduction.lot_id)
                            .unwrap();
                        slot.1 -= deduction.quantity;
                        self.movements.push((deduction.lot_id, -deduction.quantity));
                    }
                }
            }
            Op::Adjust { lot, delta } => {
                let delta = Decimal::from(*delta);
                if delta == Decimal::ZERO {
                    return;
                }
                let id = self.lot_id(*lot);
                let slot = self.lots.iter_mut().find(|(i, _)| *i == id).unwrap();
                // Adjustments that would go negative are rejected
                if slot.1 + delta < Decimal::ZERO {
                    return;
                }
                slot.1 += delta;
                self.movements.push((id, delta));
            }
        }
    }
}

// ============================================================================
// Property 1: Ledger Balance
// ============================================================================
// For every lot, current quantity equals the sum of its signed movements,
// after any sequence of receipts, withdrawals and adjustments.

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 1: per-lot quantity equals the signed movement sum
    #[test]
    fn property_1_ledger_balance(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut ledger = Ledger::default();
        for op in &ops {
            ledger.apply(op);
        }

        for (lot_id, quantity) in &ledger.lots {
            let movement_sum: Decimal = ledger
                .movements
                .iter()
                .filter(|(id, _)| id == lot_id)
                .map(|(_, q)| *q)
                .sum();
            prop_assert_eq!(
                *quantity, movement_sum,
                "lot quantity diverged from its movement history"
            );
        }
    }

    /// Property 2: no operation sequence leaves a lot negative
    #[test]
    fn property_2_no_negative_stock(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut ledger = Ledger::default();
        for op in &ops {
            ledger.apply(op);
            for (_, quantity) in &ledger.lots {
                prop_assert!(*quantity >= Decimal::ZERO);
            }
        }
    }

    /// Property 3: a rejected withdrawal mutates nothing
    #[test]
    fn property_3_failed_withdrawal_is_atomic(
        receipts in prop::collection::vec((0usize..4, 1u32..50), 1..6),
        excess in 1u32..100,
    ) {
        let mut ledger = Ledger::default();
        for (lot, quantity) in &receipts {
            ledger.apply(&Op::Receive { lot: *lot, quantity: *quantity });
        }

        let total: Decimal = ledger.lots.iter().map(|(_, q)| *q).sum();
        let before: Vec<_> = ledger.lots.clone();
        let over_draw = total + Decimal::from(excess);

        let snapshots: Vec<LotSnapshot> = ledger
            .lots
            .iter()
            .map(|(id, q)| LotSnapshot { id: *id, quantity: *q })
            .collect();
        prop_assert!(plan_fifo_deductions(&snapshots, over_draw).is_err());
        prop_assert_eq!(before, ledger.lots);
    }
}
