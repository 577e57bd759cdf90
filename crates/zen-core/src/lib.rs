//! # zen-core
//! Foundation types and traits for the ZEN wallet engine.

pub mod address;
pub mod constants;
pub mod error;
pub mod script;
pub mod traits;
pub mod txsize;
pub mod types;
