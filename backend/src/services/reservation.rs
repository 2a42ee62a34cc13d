//! Stock reservation service
//!
//! Reservations earmark quantity on a specific lot for an order without
//! moving stock. They shrink availability for new reservations but never
//! change lot quantities; only a confirmed exit or manual removal does that,
//! consuming the matching reservations in the same transaction.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::ReservationStatus;

/// Reservation service
#[derive(Clone)]
pub struct ReservationService {
    db: PgPool,
    ttl_days: i64,
}

/// A quantity earmarked on a lot for an order
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub lot_id: Uuid,
    pub quantity: Decimal,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a reservation
#[derive(Debug, Deserialize)]
pub struct CreateReservationInput {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub lot_id: Uuid,
    pub quantity: Decimal,
}

/// Minimal reservation view used by the consumption planner
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationSnapshot {
    pub id: Uuid,
    pub quantity: Decimal,
}

/// Planned change to one reservation during consumption
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationChange {
    /// The reservation is fully used up and flips to CONSUMED
    Consume(Uuid),
    /// The reservation is partially used and shrinks to the new quantity
    Shrink { id: Uuid, new_quantity: Decimal },
}

/// Plan how `amount` of fulfilled quantity consumes an order's active
/// reservations on one lot.
///
/// Reservations must be ordered smallest-first so partial consumption leaves
/// at most one shrunk reservation. If `amount` exceeds the total reserved,
/// every reservation is consumed and the excess simply came from free stock.
pub fn plan_reservation_consumption(
    reservations: &[ReservationSnapshot],
    amount: Decimal,
) -> Vec<ReservationChange> {
    let mut remaining = amount;
    let mut changes = Vec::new();

    for reservation in reservations {
        if remaining <= Decimal::ZERO {
            break;
        }
        if reservation.quantity <= remaining {
            changes.push(ReservationChange::Consume(reservation.id));
            remaining -= reservation.quantity;
        } else {
            changes.push(ReservationChange::Shrink {
                id: reservation.id,
                new_quantity: reservation.quantity - remaining,
            });
            remaining = Decimal::ZERO;
        }
    }

    changes
}

impl ReservationService {
    /// Create a new ReservationService instance
    pub fn new(db: PgPool, ttl_days: i64) -> Self {
        Self { db, ttl_days }
    }

    /// Reserve quantity on a lot for an order
    ///
    /// Headroom is the lot quantity minus all active reservations on it,
    /// regardless of order. Over-reserving a lot is rejected even when the
    /// requesting order already holds part of the reserved quantity.
    pub async fn create(&self, input: CreateReservationInput) -> AppResult<StockReservation> {
        if input.quantity <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Quantity must be positive".to_string(),
                message_pt: "Quantidade deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let lot = sqlx::query_as::<_, (Uuid, Decimal)>(
            "SELECT product_id, quantity FROM stock_lots WHERE id = $1 FOR UPDATE",
        )
        .bind(input.lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        if lot.0 != input.product_id {
            return Err(AppError::LotMismatch(
                "Lot does not belong to the given product".to_string(),
            ));
        }

        let reserved = Self::reserved_on_lot(&mut tx, input.lot_id).await?;
        let headroom = lot.1 - reserved;
        if headroom < input.quantity {
            return Err(AppError::InsufficientStock {
                available: headroom,
                requested: input.quantity,
            });
        }

        let expires_at = Utc::now() + Duration::days(self.ttl_days);

        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            INSERT INTO stock_reservations (order_id, product_id, lot_id, quantity, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, product_id, lot_id, quantity, status, expires_at,
                      created_at, updated_at
            "#,
        )
        .bind(input.order_id)
        .bind(input.product_id)
        .bind(input.lot_id)
        .bind(input.quantity)
        .bind(ReservationStatus::Active)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            order_id = %input.order_id,
            lot_id = %input.lot_id,
            quantity = %input.quantity,
            "Reservation created"
        );

        Ok(reservation)
    }

    /// Cancel an active reservation, releasing its quantity
    pub async fn cancel(&self, id: Uuid) -> AppResult<StockReservation> {
        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            UPDATE stock_reservations
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING id, order_id, product_id, lot_id, quantity, status, expires_at,
                      created_at, updated_at
            "#,
        )
        .bind(ReservationStatus::Cancelled)
        .bind(id)
        .bind(ReservationStatus::Active)
        .fetch_optional(&self.db)
        .await?;

        match reservation {
            Some(r) => Ok(r),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM stock_reservations WHERE id = $1)",
                )
                .bind(id)
                .fetch_one(&self.db)
                .await?;

                if exists {
                    Err(AppError::InvalidStateTransition(
                        "Only active reservations can be cancelled".to_string(),
                    ))
                } else {
                    Err(AppError::NotFound("Reservation".to_string()))
                }
            }
        }
    }

    /// List all reservations for an order, newest first
    pub async fn list_by_order(&self, order_id: Uuid) -> AppResult<Vec<StockReservation>> {
        let reservations = sqlx::query_as::<_, StockReservation>(
            r#"
            SELECT id, order_id, product_id, lot_id, quantity, status, expires_at,
                   created_at, updated_at
            FROM stock_reservations
            WHERE order_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(reservations)
    }

    /// Sweep active reservations past their expiry to CANCELLED.
    /// Returns how many were released.
    pub async fn expire_old(&self) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND expires_at < NOW()
            "#,
        )
        .bind(ReservationStatus::Cancelled)
        .bind(ReservationStatus::Active)
        .execute(&self.db)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::info!(count = released, "Expired reservations released");
        }

        Ok(released)
    }

    /// Consume an order's active reservations on a lot after `amount` of it
    /// was actually deducted. Runs inside the caller's transaction.
    pub async fn consume_for_order_lot(
        conn: &mut PgConnection,
        order_id: Uuid,
        lot_id: Uuid,
        amount: Decimal,
    ) -> AppResult<()> {
        let active = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT id, quantity FROM stock_reservations
            WHERE order_id = $1 AND lot_id = $2 AND status = $3
            ORDER BY quantity ASC
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(lot_id)
        .bind(ReservationStatus::Active)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id, quantity)| ReservationSnapshot { id, quantity })
        .collect::<Vec<_>>();

        for change in plan_reservation_consumption(&active, amount) {
            match change {
                ReservationChange::Consume(id) => {
                    sqlx::query(
                        "UPDATE stock_reservations SET status = $1, updated_at = NOW() WHERE id = $2",
                    )
                    .bind(ReservationStatus::Consumed)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                }
                ReservationChange::Shrink { id, new_quantity } => {
                    sqlx::query(
                        "UPDATE stock_reservations SET quantity = $1, updated_at = NOW() WHERE id = $2",
                    )
                    .bind(new_quantity)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                }
            }
        }

        Ok(())
    }

    /// Cancel every active reservation held by an order (order cancelled or
    /// reservations superseded). Runs inside the caller's transaction.
    pub async fn release_for_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $1, updated_at = NOW()
            WHERE order_id = $2 AND status = $3
            "#,
        )
        .bind(ReservationStatus::Cancelled)
        .bind(order_id)
        .bind(ReservationStatus::Active)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Total quantity actively reserved on a lot, across all orders
    pub async fn reserved_on_lot(conn: &mut PgConnection, lot_id: Uuid) -> AppResult<Decimal> {
        let reserved = sqlx::query_scalar::<_, Option<Decimal>>(
            r#"
            SELECT SUM(quantity) FROM stock_reservations
            WHERE lot_id = $1 AND status = $2
            "#,
        )
        .bind(lot_id)
        .bind(ReservationStatus::Active)
        .fetch_one(&mut *conn)
        .await?;

        Ok(reserved.unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn res(qty: &str) -> ReservationSnapshot {
        ReservationSnapshot {
            id: Uuid::new_v4(),
            quantity: dec(qty),
        }
    }

    #[test]
    fn test_consume_smallest_then_shrink_largest() {
        let reservations = vec![res("5"), res("12")];
        let changes = plan_reservation_consumption(&reservations, dec("9"));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], ReservationChange::Consume(reservations[0].id));
        assert_eq!(
            changes[1],
            ReservationChange::Shrink {
                id: reservations[1].id,
                new_quantity: dec("8"),
            }
        );
    }

    #[test]
    fn test_consume_all_when_amount_exceeds_reserved() {
        let reservations = vec![res("3"), res("4")];
        let changes = plan_reservation_consumption(&reservations, dec("10"));

        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|c| matches!(c, ReservationChange::Consume(_))));
    }

    #[test]
    fn test_exact_match_consumes_without_shrink() {
        let reservations = vec![res("6")];
        let changes = plan_reservation_consumption(&reservations, dec("6"));

        assert_eq!(changes, vec![ReservationChange::Consume(reservations[0].id)]);
    }

    #[test]
    fn test_zero_amount_touches_nothing() {
        let reservations = vec![res("6")];
        let changes = plan_reservation_consumption(&reservations, Decimal::ZERO);

        assert!(changes.is_empty());
    }
}
