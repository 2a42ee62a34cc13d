//! HTTP handlers for stock reservations

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::reservation::{CreateReservationInput, ReservationService, StockReservation};
use crate::AppState;

fn reservation_service(state: &AppState) -> ReservationService {
    ReservationService::new(state.db.clone(), state.config.stock.reservation_ttl_days)
}

/// Reserve quantity on a lot for an order
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(input): Json<CreateReservationInput>,
) -> AppResult<Json<StockReservation>> {
    let service = reservation_service(&state);
    let reservation = service.create(input).await?;
    Ok(Json(reservation))
}

/// Cancel an active reservation
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> AppResult<Json<StockReservation>> {
    let service = reservation_service(&state);
    let reservation = service.cancel(reservation_id).await?;
    Ok(Json(reservation))
}

/// List an order's reservations
pub async fn list_order_reservations(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Vec<StockReservation>>> {
    let service = reservation_service(&state);
    let reservations = service.list_by_order(order_id).await?;
    Ok(Json(reservations))
}

#[derive(Debug, Serialize)]
pub struct ExpireSweepResult {
    pub released: u64,
}

/// Sweep reservations past their expiry
pub async fn expire_reservations(
    State(state): State<AppState>,
) -> AppResult<Json<ExpireSweepResult>> {
    let service = reservation_service(&state);
    let released = service.expire_old().await?;
    Ok(Json(ExpireSweepResult { released }))
}
