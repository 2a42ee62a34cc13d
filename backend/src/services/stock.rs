//! Stock lot store and movement ledger service
//!
//! Every quantity change flows through here: lot increments paired with IN
//! movements, FIFO lot decrements paired with OUT movements, and signed
//! ADJUST corrections. The ledger is append-only; for any lot the sum of its
//! signed movements equals its current quantity.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MovementType, PageMeta, Paginated};
use crate::services::reservation::ReservationService;

/// Stock service for lot quantities and the movement ledger
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
}

/// A physical batch of one product
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockLot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub lot_number: String,
    pub quantity: Decimal,
    pub expiration_date: Option<NaiveDate>,
    pub shade: Option<String>,
    pub caliber: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger row joined with product and lot labels for display
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MovementRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit: Option<String>,
    pub lot_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub entry_id: Option<Uuid>,
    pub exit_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for manual FIFO stock removal
#[derive(Debug, Deserialize)]
pub struct RemoveStockInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub destination_type: Option<String>,
    pub destination_name: Option<String>,
    pub order_id: Option<Uuid>,
}

/// Input for a stock adjustment (signed delta)
#[derive(Debug, Deserialize)]
pub struct AdjustStockInput {
    pub product_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub quantity: Decimal,
    pub reason: String,
}

/// Query filters for movement history
#[derive(Debug, Deserialize)]
pub struct ListMovementsQuery {
    pub product_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Per-product stock snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProductStock {
    pub product_id: Uuid,
    pub total_stock: Decimal,
    pub lots: Vec<StockLot>,
}

/// The document (or manual operation) that caused a deduction
#[derive(Debug, Clone, Copy)]
pub enum DeductionCause {
    /// Confirmed stock exit, optionally linked to an order
    Exit(Uuid),
    /// Manual removal, optionally on behalf of an order
    Manual { order_id: Option<Uuid> },
    /// Negative adjustment without an explicit lot
    Adjustment,
}

/// Minimal lot view used by the FIFO planner
#[derive(Debug, Clone, PartialEq)]
pub struct LotSnapshot {
    pub id: Uuid,
    pub quantity: Decimal,
}

/// One planned or applied deduction against a lot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotDeduction {
    pub lot_id: Uuid,
    pub quantity: Decimal,
}

/// Shortage detected while planning a deduction
#[derive(Debug, Clone, PartialEq)]
pub struct Shortage {
    pub available: Decimal,
    pub requested: Decimal,
}

impl From<Shortage> for AppError {
    fn from(s: Shortage) -> Self {
        AppError::InsufficientStock {
            available: s.available,
            requested: s.requested,
        }
    }
}

/// Build the ledger reason for a manual removal, folding the destination in
/// so the movement records where the goods went.
pub fn removal_reason(
    reason: Option<&str>,
    destination_type: Option<&str>,
    destination_name: Option<&str>,
) -> String {
    let destination = match (destination_type, destination_name) {
        (Some(kind), Some(name)) => Some(format!("{}: {}", kind, name)),
        (Some(kind), None) => Some(kind.to_string()),
        (None, Some(name)) => Some(name.to_string()),
        (None, None) => None,
    };

    match (reason, destination) {
        (Some(reason), Some(destination)) => format!("{} ({})", reason, destination),
        (Some(reason), None) => reason.to_string(),
        (None, Some(destination)) => format!("Saída manual para {}", destination),
        (None, None) => "Saída manual de estoque".to_string(),
    }
}

/// Plan a FIFO deduction across candidate lots.
///
/// Lots must already be ordered by consumption priority (expiration date
/// ascending). Fails without planning anything if the candidates cannot
/// cover the requested quantity, so callers never partially apply.
pub fn plan_fifo_deductions(
    lots: &[LotSnapshot],
    requested: Decimal,
) -> Result<Vec<LotDeduction>, Shortage> {
    let available: Decimal = lots.iter().map(|l| l.quantity).sum();
    if available < requested {
        return Err(Shortage {
            available,
            requested,
        });
    }

    let mut remaining = requested;
    let mut plan = Vec::new();
    for lot in lots {
        if remaining <= Decimal::ZERO {
            break;
        }
        if lot.quantity <= Decimal::ZERO {
            continue;
        }
        let deduct = lot.quantity.min(remaining);
        plan.push(LotDeduction {
            lot_id: lot.id,
            quantity: deduct,
        });
        remaining -= deduct;
    }

    Ok(plan)
}

impl StockService {
    /// Create a new StockService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Find-or-create a lot by (product, lot number) and increment it,
    /// recording the paired IN movement tagged with the causing entry.
    ///
    /// Must run inside the entry-confirmation transaction.
    pub async fn increase_lot(
        conn: &mut PgConnection,
        product_id: Uuid,
        lot_number: &str,
        expiration_date: Option<NaiveDate>,
        shade: Option<&str>,
        caliber: Option<&str>,
        quantity: Decimal,
        entry_id: Uuid,
        reason: &str,
    ) -> AppResult<Uuid> {
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM stock_lots WHERE product_id = $1 AND lot_number = $2 FOR UPDATE",
        )
        .bind(product_id)
        .bind(lot_number)
        .fetch_optional(&mut *conn)
        .await?;

        let lot_id = match existing {
            Some(id) => {
                sqlx::query("UPDATE stock_lots SET quantity = quantity + $1, updated_at = NOW() WHERE id = $2")
                    .bind(quantity)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                id
            }
            None => {
                sqlx::query_scalar::<_, Uuid>(
                    r#"
                    INSERT INTO stock_lots (product_id, lot_number, quantity, expiration_date, shade, caliber)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(product_id)
                .bind(lot_number)
                .bind(quantity)
                .bind(expiration_date)
                .bind(shade)
                .bind(caliber)
                .fetch_one(&mut *conn)
                .await?
            }
        };

        sqlx::query(
            r#"
            INSERT INTO stock_movements (product_id, lot_id, movement_type, quantity, entry_id, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(product_id)
        .bind(lot_id)
        .bind(MovementType::In)
        .bind(quantity)
        .bind(entry_id)
        .bind(reason)
        .execute(&mut *conn)
        .await?;

        Ok(lot_id)
    }

    /// Record an IN movement that is not tied to any lot (untracked goods
    /// received without lot number/expiration).
    pub async fn record_untracked_in(
        conn: &mut PgConnection,
        product_id: Uuid,
        quantity: Decimal,
        entry_id: Uuid,
        reason: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (product_id, movement_type, quantity, entry_id, reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(product_id)
        .bind(MovementType::In)
        .bind(quantity)
        .bind(entry_id)
        .bind(reason)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Deduct `quantity` from a product's lots in FIFO order (earliest
    /// expiration first), optionally restricted to one explicit lot.
    ///
    /// Locks the candidate lots, plans the full deduction up front and fails
    /// with `InsufficientStock` before touching anything if the candidates
    /// cannot cover the request. Emits one movement per lot touched: OUT rows
    /// with positive magnitude for exits/removals, ADJUST rows with negative
    /// delta for adjustments.
    pub async fn decrease_lots(
        conn: &mut PgConnection,
        product_id: Uuid,
        quantity: Decimal,
        explicit_lot: Option<Uuid>,
        cause: DeductionCause,
        reason: &str,
    ) -> AppResult<Vec<LotDeduction>> {
        let candidates = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT id, quantity FROM stock_lots
            WHERE product_id = $1 AND quantity > 0 AND ($2::uuid IS NULL OR id = $2)
            ORDER BY expiration_date ASC NULLS LAST, created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(explicit_lot)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id, quantity)| LotSnapshot { id, quantity })
        .collect::<Vec<_>>();

        let plan = plan_fifo_deductions(&candidates, quantity)?;

        let (movement_type, exit_id, order_id) = match cause {
            DeductionCause::Exit(exit_id) => (MovementType::Out, Some(exit_id), None),
            DeductionCause::Manual { order_id } => (MovementType::Out, None, order_id),
            DeductionCause::Adjustment => (MovementType::Adjust, None, None),
        };

        for deduction in &plan {
            sqlx::query("UPDATE stock_lots SET quantity = quantity - $1, updated_at = NOW() WHERE id = $2")
                .bind(deduction.quantity)
                .bind(deduction.lot_id)
                .execute(&mut *conn)
                .await?;

            // ADJUST stores the signed delta; OUT stores the magnitude
            let movement_quantity = match movement_type {
                MovementType::Adjust => -deduction.quantity,
                _ => deduction.quantity,
            };

            sqlx::query(
                r#"
                INSERT INTO stock_movements (product_id, lot_id, movement_type, quantity, exit_id, order_id, reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(product_id)
            .bind(deduction.lot_id)
            .bind(movement_type)
            .bind(movement_quantity)
            .bind(exit_id)
            .bind(order_id)
            .bind(reason)
            .execute(&mut *conn)
            .await?;
        }

        Ok(plan)
    }

    /// Manual FIFO stock removal
    ///
    /// When linked to an order, the order's active reservations on each lot
    /// touched are consumed in the same transaction so availability is not
    /// deducted twice.
    pub async fn remove_stock(&self, input: RemoveStockInput) -> AppResult<Vec<LotDeduction>> {
        if input.quantity <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Quantity must be positive".to_string(),
                message_pt: "Quantidade deve ser positiva".to_string(),
            });
        }

        self.ensure_product_exists(input.product_id).await?;

        let reason = removal_reason(
            input.reason.as_deref(),
            input.destination_type.as_deref(),
            input.destination_name.as_deref(),
        );

        let mut tx = self.db.begin().await?;

        let deductions = Self::decrease_lots(
            &mut tx,
            input.product_id,
            input.quantity,
            None,
            DeductionCause::Manual {
                order_id: input.order_id,
            },
            &reason,
        )
        .await?;

        if let Some(order_id) = input.order_id {
            for deduction in &deductions {
                ReservationService::consume_for_order_lot(
                    &mut tx,
                    order_id,
                    deduction.lot_id,
                    deduction.quantity,
                )
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            product_id = %input.product_id,
            quantity = %input.quantity,
            lots = deductions.len(),
            "Manual stock removal applied"
        );

        Ok(deductions)
    }

    /// Apply a signed stock adjustment
    ///
    /// Positive deltas require an explicit lot; unattributed receipts must go
    /// through the stock entry workflow. Negative deltas without a lot
    /// degrade to FIFO deduction recorded as ADJUST movements.
    pub async fn adjust_stock(&self, input: AdjustStockInput) -> AppResult<()> {
        if input.quantity == Decimal::ZERO {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Adjustment delta must be non-zero".to_string(),
                message_pt: "O delta do ajuste deve ser diferente de zero".to_string(),
            });
        }

        self.ensure_product_exists(input.product_id).await?;

        let mut tx = self.db.begin().await?;

        match input.lot_id {
            Some(lot_id) => {
                let lot = sqlx::query_as::<_, (Uuid, Decimal)>(
                    "SELECT product_id, quantity FROM stock_lots WHERE id = $1 FOR UPDATE",
                )
                .bind(lot_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

                if lot.0 != input.product_id {
                    return Err(AppError::LotMismatch(
                        "Lot does not belong to the given product".to_string(),
                    ));
                }

                let new_quantity = lot.1 + input.quantity;
                if new_quantity < Decimal::ZERO {
                    return Err(AppError::InsufficientStock {
                        available: lot.1,
                        requested: -input.quantity,
                    });
                }

                sqlx::query(
                    "UPDATE stock_lots SET quantity = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(new_quantity)
                .bind(lot_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO stock_movements (product_id, lot_id, movement_type, quantity, reason)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(input.product_id)
                .bind(lot_id)
                .bind(MovementType::Adjust)
                .bind(input.quantity)
                .bind(&input.reason)
                .execute(&mut *tx)
                .await?;
            }
            None if input.quantity < Decimal::ZERO => {
                Self::decrease_lots(
                    &mut tx,
                    input.product_id,
                    -input.quantity,
                    None,
                    DeductionCause::Adjustment,
                    &input.reason,
                )
                .await?;
            }
            None => {
                return Err(AppError::Validation {
                    field: "lot_id".to_string(),
                    message: "Positive adjustments require an explicit lot; use the stock entry workflow for new receipts".to_string(),
                    message_pt: "Para ajustes positivos é necessário especificar o lote ou usar a entrada de estoque".to_string(),
                });
            }
        }

        tx.commit().await?;

        tracing::info!(
            product_id = %input.product_id,
            delta = %input.quantity,
            "Stock adjustment applied"
        );

        Ok(())
    }

    /// List ledger movements, filterable by product, type and date range
    pub async fn list_movements(
        &self,
        query: ListMovementsQuery,
    ) -> AppResult<Paginated<MovementRecord>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * limit;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_movements m
            WHERE ($1::uuid IS NULL OR m.product_id = $1)
              AND ($2::stock_movement_type IS NULL OR m.movement_type = $2)
              AND ($3::timestamptz IS NULL OR m.created_at >= $3)
              AND ($4::timestamptz IS NULL OR m.created_at <= $4)
            "#,
        )
        .bind(query.product_id)
        .bind(query.movement_type)
        .bind(query.start_date)
        .bind(query.end_date)
        .fetch_one(&self.db)
        .await?;

        let data = sqlx::query_as::<_, MovementRecord>(
            r#"
            SELECT m.id, m.product_id, p.name AS product_name, p.unit,
                   m.lot_id, l.lot_number, m.movement_type, m.quantity,
                   m.entry_id, m.exit_id, m.order_id, m.reason, m.created_at
            FROM stock_movements m
            JOIN products p ON p.id = m.product_id
            LEFT JOIN stock_lots l ON l.id = m.lot_id
            WHERE ($1::uuid IS NULL OR m.product_id = $1)
              AND ($2::stock_movement_type IS NULL OR m.movement_type = $2)
              AND ($3::timestamptz IS NULL OR m.created_at >= $3)
              AND ($4::timestamptz IS NULL OR m.created_at <= $4)
            ORDER BY m.created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(query.product_id)
        .bind(query.movement_type)
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated {
            data,
            meta: PageMeta::new(total, page, limit),
        })
    }

    /// Get current lots and total stock for a product
    pub async fn get_product_stock(&self, product_id: Uuid) -> AppResult<ProductStock> {
        self.ensure_product_exists(product_id).await?;

        let lots = sqlx::query_as::<_, StockLot>(
            r#"
            SELECT id, product_id, lot_number, quantity, expiration_date, shade, caliber,
                   created_at, updated_at
            FROM stock_lots
            WHERE product_id = $1 AND quantity > 0
            ORDER BY expiration_date ASC NULLS LAST
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.db)
        .await?;

        let total_stock = lots.iter().map(|l| l.quantity).sum();

        Ok(ProductStock {
            product_id,
            total_stock,
            lots,
        })
    }

    async fn ensure_product_exists(&self, product_id: Uuid) -> AppResult<()> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                .bind(product_id)
                .fetch_one(&self.db)
                .await?;

        if !exists {
            return Err(AppError::NotFound("Product".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn lot(qty: &str) -> LotSnapshot {
        LotSnapshot {
            id: Uuid::new_v4(),
            quantity: dec(qty),
        }
    }

    #[test]
    fn test_plan_spans_lots_in_order() {
        let lots = vec![lot("10"), lot("5"), lot("20")];
        let plan = plan_fifo_deductions(&lots, dec("17")).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].lot_id, lots[0].id);
        assert_eq!(plan[0].quantity, dec("10"));
        assert_eq!(plan[1].quantity, dec("5"));
        assert_eq!(plan[2].quantity, dec("2"));
    }

    #[test]
    fn test_plan_shortage_reports_available() {
        let lots = vec![lot("10"), lot("5")];
        let err = plan_fifo_deductions(&lots, dec("20")).unwrap_err();

        assert_eq!(err.available, dec("15"));
        assert_eq!(err.requested, dec("20"));
    }

    #[test]
    fn test_plan_exact_fit_uses_single_lot() {
        let lots = vec![lot("30"), lot("10")];
        let plan = plan_fifo_deductions(&lots, dec("30")).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].quantity, dec("30"));
    }

    #[test]
    fn test_plan_skips_empty_lots() {
        let lots = vec![lot("0"), lot("8")];
        let plan = plan_fifo_deductions(&lots, dec("5")).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].lot_id, lots[1].id);
    }

    #[test]
    fn test_removal_reason_records_destination() {
        assert_eq!(
            removal_reason(None, Some("SETOR"), Some("Obra Norte")),
            "Saída manual para SETOR: Obra Norte"
        );
        assert_eq!(
            removal_reason(Some("Quebra"), None, Some("Descarte")),
            "Quebra (Descarte)"
        );
    }

    #[test]
    fn test_removal_reason_defaults() {
        assert_eq!(removal_reason(Some("Quebra"), None, None), "Quebra");
        assert_eq!(removal_reason(None, None, None), "Saída manual de estoque");
    }
}
