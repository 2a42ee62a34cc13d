//! HTTP request handlers

pub mod allocations;
pub mod health;
pub mod orders;
pub mod products;
pub mod reservations;
pub mod stock;
pub mod stock_entries;
pub mod stock_exits;

pub use allocations::*;
pub use health::*;
pub use orders::*;
pub use products::*;
pub use reservations::*;
pub use stock::*;
pub use stock_entries::*;
pub use stock_exits::*;
