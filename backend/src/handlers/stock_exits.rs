//! HTTP handlers for stock exit documents

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::Paginated;
use crate::services::stock_exit::{
    AddExitItemInput, CreateExitInput, ListExitsQuery, StockExit, StockExitDetail, StockExitItem,
    StockExitService,
};
use crate::AppState;

/// Draft a stock exit
pub async fn create_exit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateExitInput>,
) -> AppResult<Json<StockExit>> {
    let service = StockExitService::new(state.db);
    let exit = service.create_draft(current_user.0.user_id, input).await?;
    Ok(Json(exit))
}

/// Draft a picking exit from an order, preferring its reserved lots
pub async fn create_exit_from_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<StockExitDetail>> {
    let service = StockExitService::new(state.db);
    let exit = service
        .create_from_order(current_user.0.user_id, order_id)
        .await?;
    Ok(Json(exit))
}

/// Get an exit with its items
pub async fn get_exit(
    State(state): State<AppState>,
    Path(exit_id): Path<Uuid>,
) -> AppResult<Json<StockExitDetail>> {
    let service = StockExitService::new(state.db);
    let exit = service.get(exit_id).await?;
    Ok(Json(exit))
}

/// List exits
pub async fn list_exits(
    State(state): State<AppState>,
    Query(query): Query<ListExitsQuery>,
) -> AppResult<Json<Paginated<StockExit>>> {
    let service = StockExitService::new(state.db);
    let exits = service.list(query).await?;
    Ok(Json(exits))
}

/// Add an item to a draft exit
pub async fn add_exit_item(
    State(state): State<AppState>,
    Path(exit_id): Path<Uuid>,
    Json(input): Json<AddExitItemInput>,
) -> AppResult<Json<StockExitItem>> {
    let service = StockExitService::new(state.db);
    let item = service.add_item(exit_id, input).await?;
    Ok(Json(item))
}

/// Remove an item from a draft exit
pub async fn remove_exit_item(
    State(state): State<AppState>,
    Path((exit_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<()>> {
    let service = StockExitService::new(state.db);
    service.remove_item(exit_id, item_id).await?;
    Ok(Json(()))
}

/// Confirm a draft exit, deducting stock
pub async fn confirm_exit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(exit_id): Path<Uuid>,
) -> AppResult<Json<StockExitDetail>> {
    let service = StockExitService::new(state.db);
    let exit = service.confirm(exit_id, current_user.0.user_id).await?;
    Ok(Json(exit))
}

/// Reject a draft exit
pub async fn cancel_exit(
    State(state): State<AppState>,
    Path(exit_id): Path<Uuid>,
) -> AppResult<Json<StockExit>> {
    let service = StockExitService::new(state.db);
    let exit = service.cancel(exit_id).await?;
    Ok(Json(exit))
}
