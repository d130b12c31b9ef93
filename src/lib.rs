//! `champ-kd` library crate.
//!
//! The binary (`champ`) is a thin wrapper around this library so that:
//!
//! - the fitting pipeline is testable without spawning processes
//! - the driver can be embedded in other tools (e.g. genome-wide Kd tracks)

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
