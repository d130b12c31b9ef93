//! Single-site binding model implementations.
//!
//! Models are small `Copy` values so that fitting/bootstrap code can pass them
//! by value into every worker without shared state.

pub mod energy;
pub mod model;

pub use energy::*;
pub use model::*;
