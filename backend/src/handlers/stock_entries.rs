//! HTTP handlers for stock entry documents

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::Paginated;
use crate::services::allocation::AllocationService;
use crate::services::outbox::OutboxService;
use crate::services::stock_entry::{
    AddEntryItemInput, CreateEntryInput, ListEntriesQuery, StockEntry, StockEntryDetail,
    StockEntryItem, StockEntryService,
};
use crate::AppState;

/// Draft a stock entry (deduplicated by natural key)
pub async fn create_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateEntryInput>,
) -> AppResult<Json<StockEntry>> {
    let service = StockEntryService::new(state.db);
    let entry = service.create_draft(current_user.0.user_id, input).await?;
    Ok(Json(entry))
}

/// Get an entry with its items
pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<StockEntryDetail>> {
    let service = StockEntryService::new(state.db);
    let entry = service.get(entry_id).await?;
    Ok(Json(entry))
}

/// List entries
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListEntriesQuery>,
) -> AppResult<Json<Paginated<StockEntry>>> {
    let service = StockEntryService::new(state.db);
    let entries = service.list(query).await?;
    Ok(Json(entries))
}

/// Add an item to a draft entry
pub async fn add_entry_item(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(input): Json<AddEntryItemInput>,
) -> AppResult<Json<StockEntryItem>> {
    let service = StockEntryService::new(state.db);
    let item = service.add_item(entry_id, input).await?;
    Ok(Json(item))
}

/// Remove an item from a draft entry
pub async fn remove_entry_item(
    State(state): State<AppState>,
    Path((entry_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<()>> {
    let service = StockEntryService::new(state.db);
    service.remove_item(entry_id, item_id).await?;
    Ok(Json(()))
}

/// Confirm a draft entry, applying its items to stock
///
/// The arrival rescan runs fire-and-forget after the confirmation commits;
/// the receipt is authoritative even when the rescan fails.
pub async fn confirm_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<StockEntryDetail>> {
    let service = StockEntryService::new(state.db.clone());
    let entry = service.confirm(entry_id, current_user.0.user_id).await?;

    let allocation = AllocationService::new(
        state.db.clone(),
        state.config.stock.reservation_ttl_days,
    );
    let outbox = OutboxService::new(state.db.clone());
    tokio::spawn(async move {
        if let Err(error) = outbox.dispatch_pending(&allocation).await {
            tracing::error!(%error, "Arrival dispatch after entry confirmation failed");
        }
    });

    Ok(Json(entry))
}

/// Cancel a draft entry
pub async fn cancel_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<StockEntry>> {
    let service = StockEntryService::new(state.db);
    let entry = service.cancel(entry_id).await?;
    Ok(Json(entry))
}

/// Delete a draft entry
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<()>> {
    let service = StockEntryService::new(state.db);
    service.delete(entry_id).await?;
    Ok(Json(()))
}
