// core.rs splits chain primitives into submodules for easier maintenance.
pub mod chain;
pub mod target;

pub use chain::*;
pub use target::*;
