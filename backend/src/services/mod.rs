//! Business logic services

pub mod allocation;
pub mod order;
pub mod outbox;
pub mod product;
pub mod reservation;
pub mod stock;
pub mod stock_entry;
pub mod stock_exit;

pub use allocation::AllocationService;
pub use order::OrderService;
pub use outbox::OutboxService;
pub use product::ProductService;
pub use reservation::ReservationService;
pub use stock::StockService;
pub use stock_entry::StockEntryService;
pub use stock_exit::StockExitService;
