//! HTTP handlers for the product catalog and stock alerts

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::Paginated;
use crate::services::product::{
    CreateProductInput, ExpiringLot, ListProductsQuery, Product, ProductAvailability,
    ProductService, ShadeCaliberAlert, UpdateProductInput,
};
use crate::AppState;

/// Create a product
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> AppResult<Json<Product>> {
    let service = ProductService::new(state.db);
    let product = service.create(input).await?;
    Ok(Json(product))
}

/// Get a product by id
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    let service = ProductService::new(state.db);
    let product = service.get(product_id).await?;
    Ok(Json(product))
}

/// Update a product
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(input): Json<UpdateProductInput>,
) -> AppResult<Json<Product>> {
    let service = ProductService::new(state.db);
    let product = service.update(product_id, input).await?;
    Ok(Json(product))
}

/// Deactivate a product (soft delete)
pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    let service = ProductService::new(state.db);
    let product = service.soft_delete(product_id).await?;
    Ok(Json(product))
}

/// List products
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> AppResult<Json<Paginated<Product>>> {
    let service = ProductService::new(state.db);
    let products = service.list(query).await?;
    Ok(Json(products))
}

/// Get on-hand, reserved and available figures for a product
pub async fn get_product_availability(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ProductAvailability>> {
    let service = ProductService::new(state.db);
    let availability = service.availability(product_id).await?;
    Ok(Json(availability))
}

/// Products below their minimum stock
pub async fn get_low_stock_alerts(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ProductAvailability>>> {
    let service = ProductService::new(state.db);
    let alerts = service.low_stock().await?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
pub struct ExpiringLotsQuery {
    pub days: Option<i64>,
}

/// Lots expiring within a window (defaults to the configured lookahead)
pub async fn get_expiring_lots(
    State(state): State<AppState>,
    Query(query): Query<ExpiringLotsQuery>,
) -> AppResult<Json<Vec<ExpiringLot>>> {
    let window = query
        .days
        .unwrap_or(state.config.stock.expiring_lots_window_days);
    let service = ProductService::new(state.db);
    let lots = service.expiring_lots(window).await?;
    Ok(Json(lots))
}

/// Products holding lots with mixed shade or caliber
pub async fn get_shade_caliber_alerts(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ShadeCaliberAlert>>> {
    let service = ProductService::new(state.db);
    let alerts = service.shade_caliber_alerts().await?;
    Ok(Json(alerts))
}
