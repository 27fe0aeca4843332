//! HTTP request handlers

pub mod correction;
pub mod delivery;
pub mod health;
pub mod integrity;
pub mod order;
pub mod product;

pub use correction::*;
pub use delivery::*;
pub use health::*;
pub use integrity::*;
pub use order::*;
pub use product::*;
