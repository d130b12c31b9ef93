//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - runs the Kd fit pipeline or the simulator
//! - prints reports
//! - writes optional exports

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, FitArgs, SimulateArgs};
use crate::data::{SimulationConfig, simulate_experiment};
use crate::domain::{KdConfig, SolverOptions};
use crate::error::{AppError, EXIT_INPUT};
use crate::io::{EnergyUnits, RunSummary};

pub mod pipeline;

use pipeline::FitRequest;

/// Entry point for the `champ` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Simulate(args) => handle_simulate(&args),
    }
}

/// `RUST_LOG` wins; otherwise the verbosity flags pick the level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    // A second install (e.g. from a test harness) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = kd_config_from_args(args);
    config.validate()?;
    let request = fit_request_from_args(args)?;

    let run = pipeline::run_fit(&request, &config)?;

    println!("{}", crate::report::format_run_summary(&run));
    let reference_kd = run.fits.negative_control.as_ref().map(|nc| nc.curve.kd);
    println!(
        "{}",
        crate::report::format_top_binders(&run.fits.results, args.top, request.energy, reference_kd)
    );

    if let Some(path) = &args.summary_json {
        let summary = RunSummary {
            tool: "champ".to_string(),
            generated_at: chrono::Utc::now(),
            model: run.fits.model,
            negative_control: run.fits.negative_control.clone(),
            driver: run.fits.summary,
            config,
            energy_units: request.energy,
        };
        crate::io::write_run_summary_json(path, &summary)?;
        info!(path = %path.display(), "run summary written");
    }

    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let config = simulation_config_from_args(args);
    let exp = simulate_experiment(&config)?;

    std::fs::create_dir_all(&args.out_dir).map_err(|e| {
        AppError::new(
            EXIT_INPUT,
            format!("Failed to create output directory '{}': {e}", args.out_dir.display()),
        )
    })?;
    let intensities = args.out_dir.join("intensities.tsv");
    let read_names = args.out_dir.join("read_names.tsv");
    let truth = args.out_dir.join("truth.tsv");

    crate::io::write_intensity_table(&intensities, &exp.concentrations, &exp.intensity_rows())?;
    crate::io::write_read_names(&read_names, &exp.read_names())?;
    crate::io::write_truth_table(&truth, &exp.truth)?;

    info!(
        groups = exp.groups.len(),
        clusters = config.clusters_per_group,
        dir = %args.out_dir.display(),
        "synthetic experiment written"
    );
    println!(
        "Wrote {} groups to {} (intensities.tsv, read_names.tsv, truth.tsv)",
        exp.groups.len(),
        args.out_dir.display()
    );
    Ok(())
}

pub fn kd_config_from_args(args: &FitArgs) -> KdConfig {
    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    KdConfig {
        minimum_required_counts: args.min_clusters,
        minimum_observations: args.min_observations,
        tukey_constant: args.tukey,
        bootstrap: !args.no_bootstrap,
        bootstrap_rounds: args.bootstrap_rounds,
        bootstrap_max_sample_size: args.bootstrap_max_sample,
        workers,
        seed: args.seed,
        solver: SolverOptions {
            max_iterations: args.max_iterations,
            kd_seed_steps: args.kd_seed_steps,
            ..SolverOptions::default()
        },
    }
}

fn fit_request_from_args(args: &FitArgs) -> Result<FitRequest, AppError> {
    let normalization = match (args.imin, args.imax) {
        (Some(lo), Some(hi)) => {
            if !(lo.is_finite() && hi.is_finite() && hi > lo) {
                return Err(AppError::new(EXIT_INPUT, "Normalization needs finite --imin < --imax."));
            }
            Some((lo, hi))
        }
        _ => None,
    };
    if !(args.molar_scale.is_finite() && args.molar_scale > 0.0) {
        return Err(AppError::new(EXIT_INPUT, "--molar-scale must be finite and > 0."));
    }
    if !(args.temperature.is_finite() && args.temperature > 0.0) {
        return Err(AppError::new(EXIT_INPUT, "--temperature must be finite and > 0 (kelvin)."));
    }
    Ok(FitRequest {
        intensities: args.intensities.clone(),
        read_names: args.read_names.clone(),
        output: args.output.clone(),
        negative_control: args.negative_control.clone(),
        normalization,
        energy: EnergyUnits {
            molar_scale: args.molar_scale,
            temperature_k: args.temperature,
        },
    })
}

fn simulation_config_from_args(args: &SimulateArgs) -> SimulationConfig {
    let defaults = SimulationConfig::default();
    SimulationConfig {
        concentrations: args.concentrations.clone().unwrap_or(defaults.concentrations),
        groups: args.groups,
        clusters_per_group: args.clusters,
        kd_min: args.kd_min,
        kd_max: args.kd_max,
        noise_sd: args.noise,
        missing_prob: args.missing_prob,
        outlier_prob: args.outlier_prob,
        negative_control_kd: (!args.no_negative_control).then_some(args.negative_control_kd),
        seed: args.seed,
        ..defaults
    }
}
