//! Allocation engine
//!
//! Reconciles an order's unmet demand against available lots under the
//! lot-integrity rule: one order line is satisfied entirely from a single
//! lot or not at all, because mixed-lot tile deliveries show visible shade
//! and caliber differences. Shortages are not errors; they classify into a
//! fulfillment status the order workflow reacts to.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{FulfillmentStatus, OrderStatus, PurchaseOrderStatus, ReservationStatus};
use crate::services::reservation::StockReservation;

/// Allocation engine service
#[derive(Clone)]
pub struct AllocationService {
    db: PgPool,
    reservation_ttl_days: i64,
}

/// A lot with its free (unreserved) headroom, FIFO-ordered by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct LotHeadroom {
    pub id: Uuid,
    pub quantity: Decimal,
    pub reserved: Decimal,
}

impl LotHeadroom {
    pub fn free(&self) -> Decimal {
        self.quantity - self.reserved
    }
}

/// Outcome of choosing a lot for one order line
#[derive(Debug, Clone, PartialEq)]
pub enum LotChoice {
    /// One lot can cover the full needed quantity
    Single(Uuid),
    /// Total headroom suffices but no single lot does; needs a manual split
    MixedLotShortage,
    /// Not enough stock across all lots
    Shortage,
}

/// How one order line came out of an allocation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineOutcome {
    /// Fully reserved, either previously or during this pass
    Satisfied,
    MixedLotShortage,
    Shortage,
}

/// Result of an allocation pass over one order
#[derive(Debug, Clone, Serialize)]
pub struct AllocationOutcome {
    pub order_id: Uuid,
    pub fulfillment_status: FulfillmentStatus,
    pub reservations_created: usize,
}

/// Result of an arrival-triggered rescan
#[derive(Debug, Clone, Serialize)]
pub struct ArrivalOutcome {
    pub orders_scanned: usize,
    pub orders_failed: usize,
}

/// Pick the lot for one line under the lot-integrity rule.
///
/// Candidates must be FIFO-ordered (earliest expiration first); the first
/// lot whose free headroom covers the full needed quantity wins.
pub fn choose_lot(lots: &[LotHeadroom], needed: Decimal) -> LotChoice {
    for lot in lots {
        if lot.free() >= needed {
            return LotChoice::Single(lot.id);
        }
    }

    let total_free: Decimal = lots.iter().map(|l| l.free().max(Decimal::ZERO)).sum();
    if total_free >= needed {
        LotChoice::MixedLotShortage
    } else {
        LotChoice::Shortage
    }
}

/// Classify an order's fulfillment status from its per-line outcomes
pub fn classify_fulfillment(outcomes: &[LineOutcome]) -> FulfillmentStatus {
    if outcomes.is_empty() {
        return FulfillmentStatus::Pending;
    }
    if outcomes.iter().all(|o| *o == LineOutcome::Satisfied) {
        return FulfillmentStatus::InPicking;
    }
    if outcomes.iter().any(|o| *o == LineOutcome::Satisfied) {
        return FulfillmentStatus::PartiallyFulfilled;
    }
    if outcomes.iter().any(|o| *o == LineOutcome::MixedLotShortage) {
        return FulfillmentStatus::AwaitingPicking;
    }
    FulfillmentStatus::AwaitingStock
}

/// Decide the order-status transition after an allocation pass.
///
/// Only paid orders move automatically: full allocation sends them to
/// picking; a shortage sends them to await an already-placed purchase order
/// when one is inbound, or to await purchasing otherwise.
pub fn next_order_status(
    current: OrderStatus,
    fulfillment: FulfillmentStatus,
    has_inbound_purchase: bool,
) -> Option<OrderStatus> {
    if current != OrderStatus::Paid {
        return None;
    }
    if fulfillment == FulfillmentStatus::InPicking {
        Some(OrderStatus::Picking)
    } else if has_inbound_purchase {
        Some(OrderStatus::AwaitingArrival)
    } else {
        Some(OrderStatus::AwaitingPurchase)
    }
}

impl AllocationService {
    /// Create a new AllocationService instance
    pub fn new(db: PgPool, reservation_ttl_days: i64) -> Self {
        Self {
            db,
            reservation_ttl_days,
        }
    }

    /// Run one allocation pass over an order
    ///
    /// Idempotent: lines already covered by active reservations are skipped,
    /// so a second pass with no intervening stock change reserves nothing.
    pub async fn auto_allocate_order(&self, order_id: Uuid) -> AppResult<AllocationOutcome> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, (OrderStatus,)>(
            "SELECT status FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let items = sqlx::query_as::<_, (Uuid, Decimal)>(
            "SELECT product_id, quantity FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut outcomes = Vec::with_capacity(items.len());
        let mut reservations_created = 0;

        for (product_id, demand) in &items {
            let reserved = sqlx::query_scalar::<_, Option<Decimal>>(
                r#"
                SELECT SUM(quantity) FROM stock_reservations
                WHERE order_id = $1 AND product_id = $2 AND status = $3
                "#,
            )
            .bind(order_id)
            .bind(product_id)
            .bind(ReservationStatus::Active)
            .fetch_one(&mut *tx)
            .await?
            .unwrap_or(Decimal::ZERO);

            let needed = *demand - reserved;
            if needed <= Decimal::ZERO {
                outcomes.push(LineOutcome::Satisfied);
                continue;
            }

            let lots = Self::lots_with_headroom(&mut tx, *product_id).await?;

            match choose_lot(&lots, needed) {
                LotChoice::Single(lot_id) => {
                    sqlx::query(
                        r#"
                        INSERT INTO stock_reservations (order_id, product_id, lot_id, quantity, status, expires_at)
                        VALUES ($1, $2, $3, $4, $5, NOW() + $6 * INTERVAL '1 day')
                        "#,
                    )
                    .bind(order_id)
                    .bind(product_id)
                    .bind(lot_id)
                    .bind(needed)
                    .bind(ReservationStatus::Active)
                    .bind(self.reservation_ttl_days as i32)
                    .execute(&mut *tx)
                    .await?;

                    reservations_created += 1;
                    outcomes.push(LineOutcome::Satisfied);

                    tracing::info!(
                        order_id = %order_id,
                        product_id = %product_id,
                        lot_id = %lot_id,
                        quantity = %needed,
                        "Reservation created by allocation"
                    );
                }
                LotChoice::MixedLotShortage => {
                    outcomes.push(LineOutcome::MixedLotShortage);
                    tracing::warn!(
                        order_id = %order_id,
                        product_id = %product_id,
                        needed = %needed,
                        "No single lot covers the line; manual split required"
                    );
                }
                LotChoice::Shortage => {
                    outcomes.push(LineOutcome::Shortage);
                    tracing::warn!(
                        order_id = %order_id,
                        product_id = %product_id,
                        needed = %needed,
                        "Insufficient stock for order line"
                    );
                }
            }
        }

        let fulfillment = classify_fulfillment(&outcomes);

        sqlx::query("UPDATE orders SET fulfillment_status = $1, updated_at = NOW() WHERE id = $2")
            .bind(fulfillment)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        let has_inbound_purchase = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM purchase_orders
                WHERE order_id = $1 AND status IN ($2, $3)
            )
            "#,
        )
        .bind(order_id)
        .bind(PurchaseOrderStatus::Placed)
        .bind(PurchaseOrderStatus::InTransit)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(next) = next_order_status(order.0, fulfillment, has_inbound_purchase) {
            sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(next)
                .bind(order_id)
                .execute(&mut *tx)
                .await?;

            tracing::info!(order_id = %order_id, status = %next.as_str(), "Order status advanced after allocation");
        }

        tx.commit().await?;

        Ok(AllocationOutcome {
            order_id,
            fulfillment_status: fulfillment,
            reservations_created,
        })
    }

    /// Re-run allocation for every order waiting on any of the given
    /// products, oldest-confirmed first so competing orders are served
    /// fairly. One order's failure does not abort the others.
    pub async fn process_arrival(&self, product_ids: &[Uuid]) -> AppResult<ArrivalOutcome> {
        if product_ids.is_empty() {
            return Ok(ArrivalOutcome {
                orders_scanned: 0,
                orders_failed: 0,
            });
        }

        let waiting_orders = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT o.id, o.confirmed_at
            FROM orders o
            JOIN order_items i ON i.order_id = o.id
            WHERE o.status IN ($1, $2, $3)
              AND o.fulfillment_status IN ($4, $5, $6, $7)
              AND i.product_id = ANY($8)
            ORDER BY o.confirmed_at ASC NULLS LAST
            "#,
        )
        .bind(OrderStatus::Paid)
        .bind(OrderStatus::AwaitingPurchase)
        .bind(OrderStatus::AwaitingArrival)
        .bind(FulfillmentStatus::AwaitingStock)
        .bind(FulfillmentStatus::AwaitingPicking)
        .bind(FulfillmentStatus::Pending)
        .bind(FulfillmentStatus::PartiallyFulfilled)
        .bind(product_ids)
        .fetch_all(&self.db)
        .await?;

        tracing::info!(
            orders = waiting_orders.len(),
            products = product_ids.len(),
            "Stock arrival: rescanning waiting orders"
        );

        let mut failed = 0;
        for order_id in &waiting_orders {
            if let Err(error) = self.auto_allocate_order(*order_id).await {
                failed += 1;
                tracing::error!(order_id = %order_id, %error, "Allocation failed during arrival rescan");
            }
        }

        Ok(ArrivalOutcome {
            orders_scanned: waiting_orders.len(),
            orders_failed: failed,
        })
    }

    /// Operator override: move an active reservation onto another lot of the
    /// same product, atomically cancelling the old one.
    pub async fn swap_reservation_lot(
        &self,
        reservation_id: Uuid,
        new_lot_id: Uuid,
    ) -> AppResult<StockReservation> {
        let mut tx = self.db.begin().await?;

        let old = sqlx::query_as::<_, StockReservation>(
            r#"
            SELECT id, order_id, product_id, lot_id, quantity, status, expires_at,
                   created_at, updated_at
            FROM stock_reservations WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;

        if old.status != ReservationStatus::Active {
            return Err(AppError::InvalidStateTransition(
                "Only active reservations can be moved to another lot".to_string(),
            ));
        }
        if old.lot_id == new_lot_id {
            return Err(AppError::LotMismatch(
                "Reservation already targets this lot".to_string(),
            ));
        }

        let new_lot = sqlx::query_as::<_, (Uuid, Decimal)>(
            "SELECT product_id, quantity FROM stock_lots WHERE id = $1 FOR UPDATE",
        )
        .bind(new_lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        if new_lot.0 != old.product_id {
            return Err(AppError::LotMismatch(
                "Target lot belongs to a different product".to_string(),
            ));
        }

        let reserved = sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT SUM(quantity) FROM stock_reservations WHERE lot_id = $1 AND status = $2",
        )
        .bind(new_lot_id)
        .bind(ReservationStatus::Active)
        .fetch_one(&mut *tx)
        .await?
        .unwrap_or(Decimal::ZERO);

        let headroom = new_lot.1 - reserved;
        if headroom < old.quantity {
            return Err(AppError::LotMismatch(format!(
                "Target lot has only {} unreserved; reservation needs {}",
                headroom, old.quantity
            )));
        }

        sqlx::query("UPDATE stock_reservations SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(ReservationStatus::Cancelled)
            .bind(reservation_id)
            .execute(&mut *tx)
            .await?;

        let replacement = sqlx::query_as::<_, StockReservation>(
            r#"
            INSERT INTO stock_reservations (order_id, product_id, lot_id, quantity, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, product_id, lot_id, quantity, status, expires_at,
                      created_at, updated_at
            "#,
        )
        .bind(old.order_id)
        .bind(old.product_id)
        .bind(new_lot_id)
        .bind(old.quantity)
        .bind(ReservationStatus::Active)
        .bind(old.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            reservation_id = %reservation_id,
            replacement_id = %replacement.id,
            new_lot_id = %new_lot_id,
            "Reservation moved to another lot"
        );

        Ok(replacement)
    }

    async fn lots_with_headroom(
        tx: &mut sqlx::PgConnection,
        product_id: Uuid,
    ) -> AppResult<Vec<LotHeadroom>> {
        // Lock the candidate lots first; FOR UPDATE cannot ride along with
        // the aggregate, so reserved sums come in a second query.
        let lots = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT id, quantity FROM stock_lots
            WHERE product_id = $1 AND quantity > 0
            ORDER BY expiration_date ASC NULLS LAST, created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *tx)
        .await?;

        let lot_ids: Vec<Uuid> = lots.iter().map(|(id, _)| *id).collect();
        let reserved_rows = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT lot_id, SUM(quantity) FROM stock_reservations
            WHERE lot_id = ANY($1) AND status = $2
            GROUP BY lot_id
            "#,
        )
        .bind(&lot_ids)
        .bind(ReservationStatus::Active)
        .fetch_all(&mut *tx)
        .await?;

        Ok(lots
            .into_iter()
            .map(|(id, quantity)| {
                let reserved = reserved_rows
                    .iter()
                    .find(|(lot_id, _)| *lot_id == id)
                    .map(|(_, sum)| *sum)
                    .unwrap_or(Decimal::ZERO);
                LotHeadroom {
                    id,
                    quantity,
                    reserved,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn lot(qty: &str, reserved: &str) -> LotHeadroom {
        LotHeadroom {
            id: Uuid::new_v4(),
            quantity: dec(qty),
            reserved: dec(reserved),
        }
    }

    #[test]
    fn test_choose_first_lot_with_enough_headroom() {
        let lots = vec![lot("10", "5"), lot("50", "10")];
        assert_eq!(choose_lot(&lots, dec("30")), LotChoice::Single(lots[1].id));
    }

    #[test]
    fn test_choose_respects_reservations() {
        // 50 on hand but 30 already promised elsewhere
        let lots = vec![lot("50", "30")];
        assert_eq!(choose_lot(&lots, dec("30")), LotChoice::Shortage);
        assert_eq!(choose_lot(&lots, dec("20")), LotChoice::Single(lots[0].id));
    }

    #[test]
    fn test_mixed_lot_shortage_when_only_sum_covers() {
        let lots = vec![lot("20", "0"), lot("15", "0")];
        assert_eq!(choose_lot(&lots, dec("30")), LotChoice::MixedLotShortage);
    }

    #[test]
    fn test_true_shortage() {
        let lots = vec![lot("5", "0"), lot("5", "0")];
        assert_eq!(choose_lot(&lots, dec("30")), LotChoice::Shortage);
    }

    #[test]
    fn test_classify_all_satisfied() {
        let outcomes = vec![LineOutcome::Satisfied, LineOutcome::Satisfied];
        assert_eq!(classify_fulfillment(&outcomes), FulfillmentStatus::InPicking);
    }

    #[test]
    fn test_classify_partial() {
        let outcomes = vec![LineOutcome::Satisfied, LineOutcome::Shortage];
        assert_eq!(
            classify_fulfillment(&outcomes),
            FulfillmentStatus::PartiallyFulfilled
        );
    }

    #[test]
    fn test_classify_mixed_lot_over_shortage() {
        let outcomes = vec![LineOutcome::MixedLotShortage, LineOutcome::Shortage];
        assert_eq!(
            classify_fulfillment(&outcomes),
            FulfillmentStatus::AwaitingPicking
        );
    }

    #[test]
    fn test_classify_all_short() {
        let outcomes = vec![LineOutcome::Shortage];
        assert_eq!(
            classify_fulfillment(&outcomes),
            FulfillmentStatus::AwaitingStock
        );
    }

    #[test]
    fn test_classify_empty_order_pending() {
        assert_eq!(classify_fulfillment(&[]), FulfillmentStatus::Pending);
    }

    #[test]
    fn test_paid_order_advances_to_picking() {
        assert_eq!(
            next_order_status(OrderStatus::Paid, FulfillmentStatus::InPicking, false),
            Some(OrderStatus::Picking)
        );
    }

    #[test]
    fn test_paid_order_waits_for_inbound_purchase() {
        assert_eq!(
            next_order_status(OrderStatus::Paid, FulfillmentStatus::AwaitingStock, true),
            Some(OrderStatus::AwaitingArrival)
        );
        assert_eq!(
            next_order_status(OrderStatus::Paid, FulfillmentStatus::AwaitingStock, false),
            Some(OrderStatus::AwaitingPurchase)
        );
    }

    #[test]
    fn test_unpaid_orders_never_move() {
        assert_eq!(
            next_order_status(OrderStatus::Created, FulfillmentStatus::InPicking, false),
            None
        );
        assert_eq!(
            next_order_status(OrderStatus::Picking, FulfillmentStatus::InPicking, false),
            None
        );
    }
}
