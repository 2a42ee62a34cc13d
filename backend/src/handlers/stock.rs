//! HTTP handlers for the stock ledger: movements, removals and adjustments

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::Paginated;
use crate::services::stock::{
    AdjustStockInput, ListMovementsQuery, LotDeduction, MovementRecord, ProductStock,
    RemoveStockInput, StockService,
};
use crate::AppState;

/// List movement history with filters
pub async fn list_movements(
    State(state): State<AppState>,
    Query(query): Query<ListMovementsQuery>,
) -> AppResult<Json<Paginated<MovementRecord>>> {
    let service = StockService::new(state.db);
    let movements = service.list_movements(query).await?;
    Ok(Json(movements))
}

/// Current lots and total stock for a product
pub async fn get_product_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ProductStock>> {
    let service = StockService::new(state.db);
    let stock = service.get_product_stock(product_id).await?;
    Ok(Json(stock))
}

/// Manual FIFO stock removal
pub async fn remove_stock(
    State(state): State<AppState>,
    Json(input): Json<RemoveStockInput>,
) -> AppResult<Json<Vec<LotDeduction>>> {
    let service = StockService::new(state.db);
    let deductions = service.remove_stock(input).await?;
    Ok(Json(deductions))
}

/// Signed stock adjustment
pub async fn adjust_stock(
    State(state): State<AppState>,
    Json(input): Json<AdjustStockInput>,
) -> AppResult<Json<()>> {
    let service = StockService::new(state.db);
    service.adjust_stock(input).await?;
    Ok(Json(()))
}
