//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - cluster observations (`IntensityGradient`, `ConcentrationSeries`, `FittingGroup`)
//! - the negative-control `BackgroundCurve`
//! - fit outputs (`FitResult`) and run configuration (`KdConfig`, `SolverOptions`)

pub mod types;

pub use types::*;
