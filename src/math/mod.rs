//! Mathematical utilities: least squares (linear and bounded nonlinear),
//! seed grids, stable seed mixing, and descriptive statistics.

pub mod grid;
pub mod lm;
pub mod ols;
pub mod seed;
pub mod stats;

pub use grid::*;
pub use lm::*;
pub use ols::*;
pub use seed::*;
pub use stats::*;
