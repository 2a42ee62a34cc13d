//! Shared domain types for the Tile Stock Management Platform
//!
//! Status and document-type enums used across services, mapped onto
//! PostgreSQL enum types, plus the common pagination envelope.

use serde::{Deserialize, Serialize};

/// Stock movement types recorded in the ledger
///
/// IN and OUT movements store positive magnitudes; direction is implied by
/// the type. ADJUST movements store the signed delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "stock_movement_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    In,
    Out,
    Adjust,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
        }
    }
}

/// Stock entry document lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Draft,
    Confirmed,
    Canceled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "DRAFT",
            EntryStatus::Confirmed => "CONFIRMED",
            EntryStatus::Canceled => "CANCELED",
        }
    }
}

/// Stock entry document types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Invoice,
    Manual,
    Donation,
    Return,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Invoice => "INVOICE",
            EntryType::Manual => "MANUAL",
            EntryType::Donation => "DONATION",
            EntryType::Return => "RETURN",
        }
    }
}

/// Stock exit document lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exit_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitStatus {
    Draft,
    Confirmed,
    Rejected,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Draft => "DRAFT",
            ExitStatus::Confirmed => "CONFIRMED",
            ExitStatus::Rejected => "REJECTED",
        }
    }
}

/// Stock exit document types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exit_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitType {
    Sale,
    SectorRequest,
    Transfer,
}

impl ExitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitType::Sale => "SALE",
            ExitType::SectorRequest => "SECTOR_REQUEST",
            ExitType::Transfer => "TRANSFER",
        }
    }
}

/// Stock reservation lifecycle
///
/// The only multi-state lifecycle independent of document confirmation.
/// Expired reservations are swept to CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Consumed => "CONSUMED",
        }
    }
}

/// Allocation outcome classification for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fulfillment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Pending,
    AwaitingStock,
    AwaitingPicking,
    PartiallyFulfilled,
    InPicking,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "PENDING",
            FulfillmentStatus::AwaitingStock => "AWAITING_STOCK",
            FulfillmentStatus::AwaitingPicking => "AWAITING_PICKING",
            FulfillmentStatus::PartiallyFulfilled => "PARTIALLY_FULFILLED",
            FulfillmentStatus::InPicking => "IN_PICKING",
        }
    }

    /// Whether an order in this state is still waiting on stock and should be
    /// retried when product arrives
    pub fn is_unsatisfied(&self) -> bool {
        !matches!(self, FulfillmentStatus::InPicking)
    }
}

/// Order lifecycle as seen by the stock engine (Orders collaborator surface)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Paid,
    AwaitingPurchase,
    AwaitingArrival,
    Picking,
    ReadyForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Paid => "PAID",
            OrderStatus::AwaitingPurchase => "AWAITING_PURCHASE",
            OrderStatus::AwaitingArrival => "AWAITING_ARRIVAL",
            OrderStatus::Picking => "PICKING",
            OrderStatus::ReadyForDelivery => "READY_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses under which an order competes for arriving stock
    pub fn is_waiting_for_stock(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::AwaitingPurchase | OrderStatus::AwaitingArrival
        )
    }
}

/// Purchase order lifecycle (read-only collaborator surface)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "purchase_order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Placed,
    InTransit,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// A purchase order still expected to arrive
    pub fn is_inbound(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Placed | PurchaseOrderStatus::InTransit)
    }
}

/// Outbox event lifecycle for post-commit dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Paginated response envelope
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_meta_rounds_up() {
        let meta = PageMeta::new(41, 1, 20);
        assert_eq!(meta.total_pages, 3);

        let meta = PageMeta::new(40, 1, 20);
        assert_eq!(meta.total_pages, 2);

        let meta = PageMeta::new(0, 1, 20);
        assert_eq!(meta.total_pages, 0);
    }

    #[test]
    fn test_waiting_statuses() {
        assert!(OrderStatus::Paid.is_waiting_for_stock());
        assert!(OrderStatus::AwaitingArrival.is_waiting_for_stock());
        assert!(!OrderStatus::Delivered.is_waiting_for_stock());
        assert!(FulfillmentStatus::AwaitingStock.is_unsatisfied());
        assert!(!FulfillmentStatus::InPicking.is_unsatisfied());
    }
}
