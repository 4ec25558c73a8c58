// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// header/block definitions and proof-of-work target arithmetic.

pub mod core;
pub use core::*;
