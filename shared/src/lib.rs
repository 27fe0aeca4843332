//! Shared types and ledger logic for the purchase ledger
//!
//! This crate contains the domain models and the pure reconciliation rules used by the
//! backend, and by the frontend via WASM for form pre-checks.

pub mod correction;
pub mod integrity;
pub mod models;
pub mod reconciliation;
pub mod types;
pub mod validation;

pub use models::*;
pub use reconciliation::*;
pub use types::*;
pub use validation::*;
