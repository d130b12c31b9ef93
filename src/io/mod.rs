//! Input/output helpers.
//!
//! - intensity and read-name TSV ingest (`ingest`)
//! - Kd table and run summary exports (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
