//! Kd fitting pipeline.
//!
//! Responsibilities:
//!
//! - reject outlier clusters and sparse clusters
//! - flatten surviving clusters into fitting arrays
//! - fit a binding model with bounded nonlinear least squares
//! - bootstrap the Kd uncertainty over clusters
//! - drive all groups (optionally in parallel) and tally outcomes

pub mod assemble;
pub mod bootstrap;
pub mod driver;
pub mod filter;
pub mod fitter;

pub use assemble::*;
pub use bootstrap::*;
pub use driver::*;
pub use filter::*;
pub use fitter::*;
