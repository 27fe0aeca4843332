//! Domain models for the purchase ledger

mod correction;
mod delivery;
mod integrity;
mod inventory;
mod order;

pub use correction::*;
pub use delivery::*;
pub use integrity::*;
pub use inventory::*;
pub use order::*;
