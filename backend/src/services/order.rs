//! Orders collaborator surface
//!
//! The stock engine does not own the sales workflow; this service carries
//! just enough of the order model for allocation, picking and delivery to
//! work against: demand lines, status updates and the fulfillment
//! projection written by the allocation engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{FulfillmentStatus, OrderStatus, PageMeta, Paginated};
use crate::services::reservation::ReservationService;

/// Order service
#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
}

/// An order as the stock engine sees it
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    pub status: OrderStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One demand line of an order
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Order with its demand lines
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Input for registering an order with the stock engine
#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub customer_name: String,
    pub items: Vec<CreateOrderItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Query filters for order listing
#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub fulfillment_status: Option<FulfillmentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Order counts per status
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderStatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

impl OrderService {
    /// Create a new OrderService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Register an order and its demand lines
    pub async fn create(&self, input: CreateOrderInput) -> AppResult<OrderDetail> {
        if input.items.is_empty() {
            return Err(AppError::Validation {
                field: "items".to_string(),
                message: "Order must have at least one item".to_string(),
                message_pt: "O pedido deve ter pelo menos um item".to_string(),
            });
        }
        for item in &input.items {
            if item.quantity <= Decimal::ZERO {
                return Err(AppError::Validation {
                    field: "quantity".to_string(),
                    message: "Quantity must be positive".to_string(),
                    message_pt: "Quantidade deve ser positiva".to_string(),
                });
            }
        }

        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (customer_name, status, fulfillment_status)
            VALUES ($1, $2, $3)
            RETURNING id, customer_name, status, fulfillment_status, confirmed_at, delivered_at,
                      created_at, updated_at
            "#,
        )
        .bind(&input.customer_name)
        .bind(OrderStatus::Created)
        .bind(FulfillmentStatus::Pending)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let row = sqlx::query_as::<_, OrderItem>(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity)
                VALUES ($1, $2, $3)
                RETURNING id, order_id, product_id, quantity
                "#,
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .fetch_one(&mut *tx)
            .await?;
            items.push(row);
        }

        tx.commit().await?;

        tracing::info!(order_id = %order.id, items = items.len(), "Order registered");

        Ok(OrderDetail { order, items })
    }

    /// Get an order with its demand lines
    pub async fn get_with_items(&self, order_id: Uuid) -> AppResult<OrderDetail> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, customer_name, status, fulfillment_status, confirmed_at, delivered_at,
                   created_at, updated_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(OrderDetail { order, items })
    }

    /// List orders, filterable by status and fulfillment status
    pub async fn list(&self, query: ListOrdersQuery) -> AppResult<Paginated<Order>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * limit;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM orders
            WHERE ($1::order_status IS NULL OR status = $1)
              AND ($2::fulfillment_status IS NULL OR fulfillment_status = $2)
            "#,
        )
        .bind(query.status)
        .bind(query.fulfillment_status)
        .fetch_one(&self.db)
        .await?;

        let data = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, customer_name, status, fulfillment_status, confirmed_at, delivered_at,
                   created_at, updated_at
            FROM orders
            WHERE ($1::order_status IS NULL OR status = $1)
              AND ($2::fulfillment_status IS NULL OR fulfillment_status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(query.status)
        .bind(query.fulfillment_status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated {
            data,
            meta: PageMeta::new(total, page, limit),
        })
    }

    /// Update an order's status
    ///
    /// Marking an order paid stamps its confirmation time (the allocation
    /// fairness ordering); delivery stamps delivered_at; cancellation
    /// releases every active reservation the order holds.
    pub async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = $1,
                confirmed_at = CASE WHEN $1 = $2::order_status AND confirmed_at IS NULL
                                    THEN NOW() ELSE confirmed_at END,
                delivered_at = CASE WHEN $1 = $3::order_status THEN NOW() ELSE delivered_at END,
                updated_at = NOW()
            WHERE id = $4
            RETURNING id, customer_name, status, fulfillment_status, confirmed_at, delivered_at,
                      created_at, updated_at
            "#,
        )
        .bind(status)
        .bind(OrderStatus::Paid)
        .bind(OrderStatus::Delivered)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        if status == OrderStatus::Cancelled {
            let released = ReservationService::release_for_order(&mut tx, order_id).await?;
            if released > 0 {
                tracing::info!(order_id = %order_id, count = released, "Reservations released on order cancellation");
            }
        }

        tx.commit().await?;

        Ok(order)
    }

    /// Order counts grouped by status
    pub async fn stats(&self) -> AppResult<Vec<OrderStatusCount>> {
        let counts = sqlx::query_as::<_, OrderStatusCount>(
            "SELECT status, COUNT(*) AS count FROM orders GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(counts)
    }
}
