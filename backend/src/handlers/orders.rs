//! HTTP handlers for the orders collaborator surface

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{OrderStatus, Paginated};
use crate::services::order::{
    CreateOrderInput, ListOrdersQuery, Order, OrderDetail, OrderService, OrderStatusCount,
};
use crate::AppState;

/// Register an order with its demand lines
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<Json<OrderDetail>> {
    let service = OrderService::new(state.db);
    let order = service.create(input).await?;
    Ok(Json(order))
}

/// Get an order with its demand lines
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderDetail>> {
    let service = OrderService::new(state.db);
    let order = service.get_with_items(order_id).await?;
    Ok(Json(order))
}

/// List orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<Json<Paginated<Order>>> {
    let service = OrderService::new(state.db);
    let orders = service.list(query).await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
}

/// Update an order's status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(input): Json<UpdateOrderStatusInput>,
) -> AppResult<Json<Order>> {
    let service = OrderService::new(state.db);
    let order = service.update_status(order_id, input.status).await?;
    Ok(Json(order))
}

/// Order counts per status
pub async fn get_order_stats(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<OrderStatusCount>>> {
    let service = OrderService::new(state.db);
    let stats = service.stats().await?;
    Ok(Json(stats))
}
