//! Stock exit service
//!
//! Outbound goods documents. Drafts carry the intended items; confirmation
//! deducts lots (explicit lot when the item names one, FIFO otherwise),
//! records OUT movements, consumes the linked order's reservations on the
//! lots actually touched, and advances the order out of picking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ExitStatus, ExitType, OrderStatus, PageMeta, Paginated, ReservationStatus};
use crate::services::reservation::ReservationService;
use crate::services::stock::{DeductionCause, Shortage, StockService};

/// Stock exit service
#[derive(Clone)]
pub struct StockExitService {
    db: PgPool,
}

/// An outbound goods document
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockExit {
    pub id: Uuid,
    pub exit_type: ExitType,
    pub status: ExitStatus,
    pub order_id: Option<Uuid>,
    pub destination_type: Option<String>,
    pub destination_name: Option<String>,
    pub notes: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of an exit document
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockExitItem {
    pub id: Uuid,
    pub exit_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub lot_id: Option<Uuid>,
}

/// Exit with its items
#[derive(Debug, Clone, Serialize)]
pub struct StockExitDetail {
    #[serde(flatten)]
    pub exit: StockExit,
    pub items: Vec<StockExitItem>,
}

/// Input for drafting an exit
#[derive(Debug, Deserialize)]
pub struct CreateExitInput {
    pub exit_type: ExitType,
    pub order_id: Option<Uuid>,
    pub destination_type: Option<String>,
    pub destination_name: Option<String>,
    pub notes: Option<String>,
}

/// Input for adding an item to a draft exit
#[derive(Debug, Deserialize)]
pub struct AddExitItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub lot_id: Option<Uuid>,
}

/// Query filters for exit listing
#[derive(Debug, Deserialize)]
pub struct ListExitsQuery {
    pub status: Option<ExitStatus>,
    pub exit_type: Option<ExitType>,
    pub order_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Compare on-hand stock against a drafted quantity. A failing check keeps
/// the item out of the draft; passing is no promise, confirmation re-checks
/// under lock.
pub fn check_draft_availability(available: Decimal, requested: Decimal) -> Result<(), Shortage> {
    if available < requested {
        return Err(Shortage {
            available,
            requested,
        });
    }
    Ok(())
}

impl StockExitService {
    /// Create a new StockExitService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Draft a new exit document
    pub async fn create_draft(&self, created_by: Uuid, input: CreateExitInput) -> AppResult<StockExit> {
        if let Some(order_id) = input.order_id {
            let exists =
                sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                    .bind(order_id)
                    .fetch_one(&self.db)
                    .await?;
            if !exists {
                return Err(AppError::NotFound("Order".to_string()));
            }
        }

        let exit = sqlx::query_as::<_, StockExit>(
            r#"
            INSERT INTO stock_exits (exit_type, status, order_id, destination_type,
                                     destination_name, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, exit_type, status, order_id, destination_type, destination_name,
                      notes, confirmed_at, approved_by, created_by, created_at, updated_at
            "#,
        )
        .bind(input.exit_type)
        .bind(ExitStatus::Draft)
        .bind(input.order_id)
        .bind(&input.destination_type)
        .bind(&input.destination_name)
        .bind(&input.notes)
        .bind(created_by)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(exit_id = %exit.id, exit_type = %exit.exit_type.as_str(), "Stock exit drafted");

        Ok(exit)
    }

    /// Draft a picking exit from an order's items
    ///
    /// Items are pinned to the lots the order actively reserved; any
    /// remainder not covered by reservations becomes a lot-less item that
    /// will deduct FIFO at confirmation.
    pub async fn create_from_order(&self, created_by: Uuid, order_id: Uuid) -> AppResult<StockExitDetail> {
        let mut tx = self.db.begin().await?;

        let order_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                .bind(order_id)
                .fetch_one(&mut *tx)
                .await?;
        if !order_exists {
            return Err(AppError::NotFound("Order".to_string()));
        }

        let order_items = sqlx::query_as::<_, (Uuid, Decimal)>(
            "SELECT product_id, quantity FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        if order_items.is_empty() {
            return Err(AppError::Validation {
                field: "order_id".to_string(),
                message: "Order has no items".to_string(),
                message_pt: "O pedido não possui itens".to_string(),
            });
        }

        let exit = sqlx::query_as::<_, StockExit>(
            r#"
            INSERT INTO stock_exits (exit_type, status, order_id, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, exit_type, status, order_id, destination_type, destination_name,
                      notes, confirmed_at, approved_by, created_by, created_at, updated_at
            "#,
        )
        .bind(ExitType::Sale)
        .bind(ExitStatus::Draft)
        .bind(order_id)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::new();
        for (product_id, quantity) in order_items {
            let reservations = sqlx::query_as::<_, (Uuid, Decimal)>(
                r#"
                SELECT lot_id, quantity FROM stock_reservations
                WHERE order_id = $1 AND product_id = $2 AND status = $3
                ORDER BY created_at ASC
                "#,
            )
            .bind(order_id)
            .bind(product_id)
            .bind(ReservationStatus::Active)
            .fetch_all(&mut *tx)
            .await?;

            let mut remaining = quantity;
            for (lot_id, reserved) in reservations {
                if remaining <= Decimal::ZERO {
                    break;
                }
                let take = reserved.min(remaining);
                items.push(
                    Self::insert_item(&mut tx, exit.id, product_id, take, Some(lot_id)).await?,
                );
                remaining -= take;
            }
            if remaining > Decimal::ZERO {
                items.push(
                    Self::insert_item(&mut tx, exit.id, product_id, remaining, None).await?,
                );
            }
        }

        tx.commit().await?;

        tracing::info!(exit_id = %exit.id, order_id = %order_id, items = items.len(), "Picking exit drafted from order");

        Ok(StockExitDetail { exit, items })
    }

    /// Add an item to a draft exit
    pub async fn add_item(&self, exit_id: Uuid, input: AddExitItemInput) -> AppResult<StockExitItem> {
        if input.quantity <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Quantity must be positive".to_string(),
                message_pt: "Quantidade deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        Self::require_draft(&mut tx, exit_id).await?;

        if let Some(lot_id) = input.lot_id {
            let lot_product = sqlx::query_scalar::<_, Uuid>(
                "SELECT product_id FROM stock_lots WHERE id = $1",
            )
            .bind(lot_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

            if lot_product != input.product_id {
                return Err(AppError::LotMismatch(
                    "Lot does not belong to the given product".to_string(),
                ));
            }
        }

        // Draft-time availability check so shortages surface to the operator
        // before confirmation; the confirming transaction still re-verifies
        // under lock.
        let available = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0) FROM stock_lots
            WHERE product_id = $1 AND ($2::uuid IS NULL OR id = $2)
            "#,
        )
        .bind(input.product_id)
        .bind(input.lot_id)
        .fetch_one(&mut *tx)
        .await?;
        check_draft_availability(available, input.quantity)?;

        let item =
            Self::insert_item(&mut tx, exit_id, input.product_id, input.quantity, input.lot_id)
                .await?;

        tx.commit().await?;
        Ok(item)
    }

    /// Remove an item from a draft exit
    pub async fn remove_item(&self, exit_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        Self::require_draft(&mut tx, exit_id).await?;

        let result = sqlx::query("DELETE FROM stock_exit_items WHERE id = $1 AND exit_id = $2")
            .bind(item_id)
            .bind(exit_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Exit item".to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Confirm a draft exit, deducting stock
    ///
    /// All-or-nothing: if any item cannot be covered the whole confirmation
    /// rolls back with an insufficient-stock error. Reservations of the
    /// linked order are consumed lot by lot as the deductions land, and an
    /// order in picking advances to READY_FOR_DELIVERY.
    pub async fn confirm(&self, exit_id: Uuid, approved_by: Uuid) -> AppResult<StockExitDetail> {
        let mut tx = self.db.begin().await?;

        let exit = Self::fetch_for_update(&mut tx, exit_id).await?;
        if exit.status != ExitStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft exits can be confirmed".to_string(),
            ));
        }

        let items = sqlx::query_as::<_, StockExitItem>(
            r#"
            SELECT id, exit_id, product_id, quantity, lot_id
            FROM stock_exit_items WHERE exit_id = $1
            ORDER BY id
            "#,
        )
        .bind(exit_id)
        .fetch_all(&mut *tx)
        .await?;

        if items.is_empty() {
            return Err(AppError::Validation {
                field: "items".to_string(),
                message: "Cannot confirm an exit without items".to_string(),
                message_pt: "Não é possível confirmar uma saída sem itens".to_string(),
            });
        }

        let reason = match exit.order_id {
            Some(order_id) => format!("Separação do pedido {}", order_id),
            None => format!("Saída {}", exit.exit_type.as_str()),
        };

        for item in &items {
            let deductions = StockService::decrease_lots(
                &mut tx,
                item.product_id,
                item.quantity,
                item.lot_id,
                DeductionCause::Exit(exit_id),
                &reason,
            )
            .await?;

            if let Some(order_id) = exit.order_id {
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
        }

        let confirmed = sqlx::query_as::<_, StockExit>(
            r#"
            UPDATE stock_exits
            SET status = $1, confirmed_at = NOW(), approved_by = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, exit_type, status, order_id, destination_type, destination_name,
                      notes, confirmed_at, approved_by, created_by, created_at, updated_at
            "#,
        )
        .bind(ExitStatus::Confirmed)
        .bind(approved_by)
        .bind(exit_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(order_id) = exit.order_id {
            sqlx::query(
                "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
            )
            .bind(OrderStatus::ReadyForDelivery)
            .bind(order_id)
            .bind(OrderStatus::Picking)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(exit_id = %exit_id, approved_by = %approved_by, items = items.len(), "Stock exit confirmed");

        Ok(StockExitDetail {
            exit: confirmed,
            items,
        })
    }

    /// Reject a draft exit
    pub async fn cancel(&self, exit_id: Uuid) -> AppResult<StockExit> {
        let exit = sqlx::query_as::<_, StockExit>(
            r#"
            UPDATE stock_exits
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING id, exit_type, status, order_id, destination_type, destination_name,
                      notes, confirmed_at, approved_by, created_by, created_at, updated_at
            "#,
        )
        .bind(ExitStatus::Rejected)
        .bind(exit_id)
        .bind(ExitStatus::Draft)
        .fetch_optional(&self.db)
        .await?;

        match exit {
            Some(e) => Ok(e),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM stock_exits WHERE id = $1)",
                )
                .bind(exit_id)
                .fetch_one(&self.db)
                .await?;

                if exists {
                    Err(AppError::InvalidStateTransition(
                        "Only draft exits can be rejected".to_string(),
                    ))
                } else {
                    Err(AppError::NotFound("Stock exit".to_string()))
                }
            }
        }
    }

    /// Get an exit with its items
    pub async fn get(&self, exit_id: Uuid) -> AppResult<StockExitDetail> {
        let exit = sqlx::query_as::<_, StockExit>(
            r#"
            SELECT id, exit_type, status, order_id, destination_type, destination_name,
                   notes, confirmed_at, approved_by, created_by, created_at, updated_at
            FROM stock_exits WHERE id = $1
            "#,
        )
        .bind(exit_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock exit".to_string()))?;

        let items = sqlx::query_as::<_, StockExitItem>(
            r#"
            SELECT id, exit_id, product_id, quantity, lot_id
            FROM stock_exit_items WHERE exit_id = $1
            ORDER BY id
            "#,
        )
        .bind(exit_id)
        .fetch_all(&self.db)
        .await?;

        Ok(StockExitDetail { exit, items })
    }

    /// List exits, filterable by status, type and order
    pub async fn list(&self, query: ListExitsQuery) -> AppResult<Paginated<StockExit>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * limit;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_exits
            WHERE ($1::exit_status IS NULL OR status = $1)
              AND ($2::exit_type IS NULL OR exit_type = $2)
              AND ($3::uuid IS NULL OR order_id = $3)
            "#,
        )
        .bind(query.status)
        .bind(query.exit_type)
        .bind(query.order_id)
        .fetch_one(&self.db)
        .await?;

        let data = sqlx::query_as::<_, StockExit>(
            r#"
            SELECT id, exit_type, status, order_id, destination_type, destination_name,
                   notes, confirmed_at, approved_by, created_by, created_at, updated_at
            FROM stock_exits
            WHERE ($1::exit_status IS NULL OR status = $1)
              AND ($2::exit_type IS NULL OR exit_type = $2)
              AND ($3::uuid IS NULL OR order_id = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.status)
        .bind(query.exit_type)
        .bind(query.order_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated {
            data,
            meta: PageMeta::new(total, page, limit),
        })
    }

    async fn insert_item(
        conn: &mut PgConnection,
        exit_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        lot_id: Option<Uuid>,
    ) -> AppResult<StockExitItem> {
        let item = sqlx::query_as::<_, StockExitItem>(
            r#"
            INSERT INTO stock_exit_items (exit_id, product_id, quantity, lot_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, exit_id, product_id, quantity, lot_id
            "#,
        )
        .bind(exit_id)
        .bind(product_id)
        .bind(quantity)
        .bind(lot_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(item)
    }

    async fn fetch_for_update(conn: &mut PgConnection, exit_id: Uuid) -> AppResult<StockExit> {
        sqlx::query_as::<_, StockExit>(
            r#"
            SELECT id, exit_type, status, order_id, destination_type, destination_name,
                   notes, confirmed_at, approved_by, created_by, created_at, updated_at
            FROM stock_exits WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(exit_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock exit".to_string()))
    }

    async fn require_draft(conn: &mut PgConnection, exit_id: Uuid) -> AppResult<()> {
        let exit = Self::fetch_for_update(conn, exit_id).await?;
        if exit.status != ExitStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft exits can be modified".to_string(),
            ));
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

    #[test]
    fn test_draft_item_within_stock_passes() {
        assert!(check_draft_availability(dec("10"), dec("10")).is_ok());
        assert!(check_draft_availability(dec("10.5"), dec("3")).is_ok());
    }

    #[test]
    fn test_draft_item_over_stock_reports_shortage() {
        let err = check_draft_availability(dec("4"), dec("7.25")).unwrap_err();
        assert_eq!(err.available, dec("4"));
        assert_eq!(err.requested, dec("7.25"));
    }
}
