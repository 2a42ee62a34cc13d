//! HTTP handlers for the allocation engine

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::allocation::{AllocationOutcome, AllocationService, ArrivalOutcome};
use crate::services::outbox::{DispatchSummary, OutboxService};
use crate::services::reservation::StockReservation;
use crate::AppState;

fn allocation_service(state: &AppState) -> AllocationService {
    AllocationService::new(state.db.clone(), state.config.stock.reservation_ttl_days)
}

/// Run an allocation pass over one order
pub async fn allocate_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<AllocationOutcome>> {
    let service = allocation_service(&state);
    let outcome = service.auto_allocate_order(order_id).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ProcessArrivalInput {
    pub product_ids: Vec<Uuid>,
}

/// Rescan waiting orders after a stock arrival
pub async fn process_arrival(
    State(state): State<AppState>,
    Json(input): Json<ProcessArrivalInput>,
) -> AppResult<Json<ArrivalOutcome>> {
    let service = allocation_service(&state);
    let outcome = service.process_arrival(&input.product_ids).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct SwapLotInput {
    pub new_lot_id: Uuid,
}

/// Move a reservation onto another lot of the same product
pub async fn swap_reservation_lot(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Json(input): Json<SwapLotInput>,
) -> AppResult<Json<StockReservation>> {
    let service = allocation_service(&state);
    let reservation = service
        .swap_reservation_lot(reservation_id, input.new_lot_id)
        .await?;
    Ok(Json(reservation))
}

/// Drain pending outbox events, running arrival rescans for them
pub async fn process_outbox(State(state): State<AppState>) -> AppResult<Json<DispatchSummary>> {
    let allocation = allocation_service(&state);
    let outbox = OutboxService::new(state.db.clone());
    let summary = outbox.dispatch_pending(&allocation).await?;
    Ok(Json(summary))
}
