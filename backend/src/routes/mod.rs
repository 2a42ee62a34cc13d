//! Route definitions for the Tile Stock Management Platform

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - product catalog and alerts
        .nest("/products", product_routes())
        // Protected routes - ledger, removals, adjustments
        .nest("/stock", stock_routes())
        // Protected routes - entry documents
        .nest("/stock-entries", stock_entry_routes())
        // Protected routes - exit documents
        .nest("/stock-exits", stock_exit_routes())
        // Protected routes - reservations
        .nest("/reservations", reservation_routes())
        // Protected routes - allocation engine
        .nest("/allocations", allocation_routes())
        // Protected routes - orders collaborator surface
        .nest("/orders", order_routes())
}

/// Product catalog routes (protected)
fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_products).post(handlers::create_product))
        .route("/alerts/low-stock", get(handlers::get_low_stock_alerts))
        .route("/alerts/expiring-lots", get(handlers::get_expiring_lots))
        .route("/alerts/shade-caliber", get(handlers::get_shade_caliber_alerts))
        .route(
            "/:product_id",
            get(handlers::get_product)
                .put(handlers::update_product)
                .delete(handlers::delete_product),
        )
        .route("/:product_id/availability", get(handlers::get_product_availability))
        .route("/:product_id/stock", get(handlers::get_product_stock))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Stock ledger routes (protected)
fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/movements", get(handlers::list_movements))
        .route("/remove", post(handlers::remove_stock))
        .route("/adjust", post(handlers::adjust_stock))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Stock entry routes (protected)
fn stock_entry_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_entries).post(handlers::create_entry))
        .route(
            "/:entry_id",
            get(handlers::get_entry).delete(handlers::delete_entry),
        )
        .route("/:entry_id/items", post(handlers::add_entry_item))
        .route("/:entry_id/items/:item_id", delete(handlers::remove_entry_item))
        .route("/:entry_id/confirm", post(handlers::confirm_entry))
        .route("/:entry_id/cancel", post(handlers::cancel_entry))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Stock exit routes (protected)
fn stock_exit_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_exits).post(handlers::create_exit))
        .route("/from-order/:order_id", post(handlers::create_exit_from_order))
        .route("/:exit_id", get(handlers::get_exit))
        .route("/:exit_id/items", post(handlers::add_exit_item))
        .route("/:exit_id/items/:item_id", delete(handlers::remove_exit_item))
        .route("/:exit_id/confirm", post(handlers::confirm_exit))
        .route("/:exit_id/cancel", post(handlers::cancel_exit))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Reservation routes (protected)
fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_reservation))
        .route("/expire", post(handlers::expire_reservations))
        .route("/:reservation_id", delete(handlers::cancel_reservation))
        .route("/:reservation_id/swap-lot", put(handlers::swap_reservation_lot))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Allocation engine routes (protected)
fn allocation_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/:order_id", post(handlers::allocate_order))
        .route("/arrivals", post(handlers::process_arrival))
        .route("/outbox/process", post(handlers::process_outbox))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Order routes (protected)
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_orders).post(handlers::create_order))
        .route("/stats", get(handlers::get_order_stats))
        .route("/:order_id", get(handlers::get_order))
        .route("/:order_id/status", put(handlers::update_order_status))
        .route("/:order_id/reservations", get(handlers::list_order_reservations))
        .route_layer(middleware::from_fn(auth_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_routes_assemble() {
        let _router = api_routes();
    }
}
