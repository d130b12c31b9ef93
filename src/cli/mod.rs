//! Command-line parsing for the CHAMP Kd fitter.
//!
//! Parsing and dispatch stay separate from the fitting code; `app` turns these
//! arguments into a `KdConfig` and a `FitRequest`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "champ", version, about = "CHAMP binding-curve Kd fitter")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a Kd for every sequence group and write a Kd table.
    Fit(FitArgs),
    /// Write a synthetic experiment with known Kds.
    Simulate(SimulateArgs),
}

/// Options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Intensity table: `read_name<TAB>conc…` header, one row per cluster.
    #[arg(long, value_name = "TSV")]
    pub intensities: PathBuf,

    /// Read names per group: `label<TAB>read…`, no header.
    #[arg(long, value_name = "TSV")]
    pub read_names: PathBuf,

    /// Output Kd table.
    #[arg(short, long, value_name = "TSV", default_value = "kds.tsv")]
    pub output: PathBuf,

    /// Label of the negative-control group; enables background-corrected fits.
    #[arg(long, value_name = "LABEL")]
    pub negative_control: Option<String>,

    /// Minimum clusters that must survive filtering for a group to be fit.
    #[arg(long, default_value_t = 6)]
    pub min_clusters: usize,

    /// Minimum real observations per cluster (default: max(#concentrations - 3, 5)).
    #[arg(long)]
    pub min_observations: Option<usize>,

    /// Tukey fence constant for outlier rejection.
    #[arg(long, default_value_t = 1.5)]
    pub tukey: f64,

    /// Skip bootstrap uncertainty (uncertainties are reported as 0).
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Successful bootstrap fits required per group.
    #[arg(long, default_value_t = 100)]
    pub bootstrap_rounds: usize,

    /// Maximum clusters drawn per bootstrap resample.
    #[arg(long, default_value_t = 2000)]
    pub bootstrap_max_sample: usize,

    /// Worker threads (default: available parallelism).
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Seed for bootstrap resampling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum Levenberg-Marquardt iterations per fit.
    #[arg(long, default_value_t = 400)]
    pub max_iterations: usize,

    /// Log-spaced Kd values tried when seeding each fit.
    #[arg(long, default_value_t = 40)]
    pub kd_seed_steps: usize,

    /// Rescale intensities by (v - imin) / (imax - imin); requires --imax.
    #[arg(long, requires = "imax")]
    pub imin: Option<f64>,

    /// Upper normalization bound; requires --imin.
    #[arg(long, requires = "imin")]
    pub imax: Option<f64>,

    /// Molar factor of the concentration unit, used for dG (default nM).
    #[arg(long, default_value_t = 1e-9)]
    pub molar_scale: f64,

    /// Temperature in kelvin, used for dG.
    #[arg(long, default_value_t = 298.15)]
    pub temperature: f64,

    /// Show the N tightest binders.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Write a JSON run summary.
    #[arg(long, value_name = "JSON")]
    pub summary_json: Option<PathBuf>,
}

/// Options for generating a synthetic experiment.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output directory for intensities.tsv, read_names.tsv and truth.tsv.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Comma-separated concentrations (default: 3-fold series from 0.91 to 2000).
    #[arg(long, value_delimiter = ',')]
    pub concentrations: Option<Vec<f64>>,

    /// Number of sequence groups.
    #[arg(short = 'n', long, default_value_t = 50)]
    pub groups: usize,

    /// Clusters per group.
    #[arg(long, default_value_t = 20)]
    pub clusters: usize,

    #[arg(long, default_value_t = 1.0)]
    pub kd_min: f64,

    #[arg(long, default_value_t = 500.0)]
    pub kd_max: f64,

    /// Standard deviation of additive read noise.
    #[arg(long, default_value_t = 10.0)]
    pub noise: f64,

    /// Probability that one observation is missing.
    #[arg(long, default_value_t = 0.05)]
    pub missing_prob: f64,

    /// Probability that a cluster carries one spiked intensity.
    #[arg(long, default_value_t = 0.02)]
    pub outlier_prob: f64,

    /// Kd of the simulated negative-control group.
    #[arg(long, default_value_t = 5000.0)]
    pub negative_control_kd: f64,

    /// Omit the negative-control group.
    #[arg(long)]
    pub no_negative_control: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
