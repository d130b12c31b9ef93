//! Bootstrap uncertainty for Kd.
//!
//! Clusters (not individual points) are resampled with replacement, and every
//! resample goes through the same assembly and fitting path as the primary fit,
//! so cluster-count variability is reflected in the spread of the estimates.
//!
//! Failed fits do not count as rounds. The loop keeps drawing until `rounds` fits
//! succeed or `rounds × 10` attempts have been made.

use rand::Rng;

use crate::domain::{ConcentrationSeries, IntensityGradient, SolverOptions};
use crate::fit::assemble::assemble_observations;
use crate::fit::fitter::fit_binding_curve;
use crate::math::sample_std;
use crate::models::BindingModel;

/// Attempts allowed per required successful round.
pub const ATTEMPTS_PER_ROUND: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapOptions {
    pub rounds: usize,
    pub max_sample_size: usize,
    /// Passed through to the assembler for every resample.
    pub minimum_observations: usize,
}

/// Kd estimates from the successful rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapEstimate {
    pub kds: Vec<f64>,
    pub attempts: usize,
}

impl BootstrapEstimate {
    /// Sample standard deviation of the bootstrapped Kds.
    pub fn standard_deviation(&self) -> f64 {
        sample_std(&self.kds).unwrap_or(0.0)
    }
}

/// Fewer than the required number of fits succeeded within the attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapExhausted {
    pub successes: usize,
    pub attempts: usize,
}

impl std::fmt::Display for BootstrapExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bootstrap exhausted: {} successful fits in {} attempts",
            self.successes, self.attempts
        )
    }
}

/// Draw `min(cap, n)` indices uniformly from `[0, n)`, with replacement.
pub fn sample_indices_with_replacement<R: Rng + ?Sized>(n: usize, cap: usize, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (0..n.min(cap)).map(|_| rng.gen_range(0..n)).collect()
}

/// Resample clusters and refit until `opts.rounds` fits succeed.
pub fn bootstrap_kd<R: Rng + ?Sized>(
    model: &BindingModel,
    concentrations: &ConcentrationSeries,
    gradients: &[&IntensityGradient],
    opts: &BootstrapOptions,
    solver: &SolverOptions,
    rng: &mut R,
) -> Result<BootstrapEstimate, BootstrapExhausted> {
    if gradients.is_empty() || opts.rounds == 0 {
        return Err(BootstrapExhausted {
            successes: 0,
            attempts: 0,
        });
    }

    let max_attempts = opts.rounds.saturating_mul(ATTEMPTS_PER_ROUND);
    let mut kds = Vec::with_capacity(opts.rounds);
    let mut attempts = 0;
    let mut sample = Vec::with_capacity(gradients.len().min(opts.max_sample_size));

    while attempts < max_attempts && kds.len() < opts.rounds {
        attempts += 1;
        sample.clear();
        sample.extend(
            sample_indices_with_replacement(gradients.len(), opts.max_sample_size, rng)
                .into_iter()
                .map(|i| gradients[i]),
        );
        let assembled = assemble_observations(concentrations, &sample, opts.minimum_observations);
        if let Ok(fit) = fit_binding_curve(model, &assembled.observations, solver) {
            kds.push(fit.kd());
        }
    }

    if kds.len() < opts.rounds {
        return Err(BootstrapExhausted {
            successes: kds.len(),
            attempts,
        });
    }
    Ok(BootstrapEstimate { kds, attempts })
}
