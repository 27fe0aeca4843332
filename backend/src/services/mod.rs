//! Business logic services for the purchase ledger

pub mod allocation;
pub mod correction;
pub mod delivery;
pub mod integrity;
pub mod order;
pub mod product;

pub use allocation::AllocationService;
pub use correction::CorrectionService;
pub use delivery::DeliveryService;
pub use integrity::IntegrityService;
pub use order::OrderService;
pub use product::ProductService;
