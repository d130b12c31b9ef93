//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - borrowed read-only by the fitting workers
//! - exported to TSV/JSON
//! - reloaded later for downstream aggregation (e.g. genomic KD tracks)

use serde::{Deserialize, Serialize};

use crate::error::{AppError, EXIT_INPUT};

/// Intensity values for one cluster, one entry per concentration index.
///
/// `None` marks a concentration at which the cluster was not observed. It is
/// never conflated with a zero intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityGradient {
    values: Vec<Option<f64>>,
}

impl IntensityGradient {
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self { values }
    }

    /// Build a fully observed gradient.
    pub fn observed(values: &[f64]) -> Self {
        Self {
            values: values.iter().copied().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Number of real (non-missing) observations.
    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// `(index, intensity)` for every real observation, in index order.
    pub fn observations(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
    }

    /// Rescale every observation to `(v - imin) / (imax - imin)`.
    pub fn normalized(&self, imin: f64, imax: f64) -> Self {
        let d = imax - imin;
        Self {
            values: self.values.iter().map(|v| v.map(|v| (v - imin) / d)).collect(),
        }
    }
}

/// The ordered, de-duplicated concentrations used across an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ConcentrationSeries {
    values: Vec<f64>,
}

impl ConcentrationSeries {
    /// Validate and wrap a concentration list.
    ///
    /// Concentrations must be finite, positive, and strictly increasing. A
    /// violation means the upstream pipeline is broken, so it is reported as an
    /// invariant violation rather than a recoverable input problem.
    pub fn new(values: Vec<f64>) -> Result<Self, AppError> {
        if values.is_empty() {
            return Err(AppError::invariant("concentration series is empty"));
        }
        if let Some(bad) = values.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
            return Err(AppError::invariant(format!(
                "concentration {bad} is not a finite positive number"
            )));
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AppError::invariant(format!(
                "concentration series is not strictly increasing: {values:?}"
            )));
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Default per-cluster observation threshold: `max(n - 3, 5)`.
    pub fn default_minimum_observations(&self) -> usize {
        self.values.len().saturating_sub(3).max(5)
    }
}

impl TryFrom<Vec<f64>> for ConcentrationSeries {
    type Error = AppError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<ConcentrationSeries> for Vec<f64> {
    fn from(series: ConcentrationSeries) -> Self {
        series.values
    }
}

/// Clusters believed to share one molecular identity (a sequence or locus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittingGroup {
    pub label: String,
    pub gradients: Vec<IntensityGradient>,
}

impl FittingGroup {
    pub fn new(label: impl Into<String>, gradients: Vec<IntensityGradient>) -> Self {
        Self {
            label: label.into(),
            gradients,
        }
    }
}

/// A pre-fit non-specific binding curve (from the negative control group).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundCurve {
    pub delta_y: f64,
    pub kd: f64,
    pub offset: f64,
}

/// Per-group fit output.
///
/// `kd_uncertainty` is the bootstrap standard deviation, `Some(0.0)` when the
/// bootstrap was skipped, and `None` when the bootstrap could not collect
/// enough successful fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub label: String,
    pub kd: f64,
    pub kd_uncertainty: Option<f64>,
    pub delta_y: f64,
    /// Fitted offset (baseline model) or the background offset (background model).
    pub offset: f64,
    /// Only present for background-corrected fits.
    pub fractional_contribution: Option<f64>,
    /// Clusters that entered the fit.
    pub clusters: usize,
    /// Flattened `(concentration, intensity)` pairs that entered the fit.
    pub observations: usize,
}

/// Options for the bounded nonlinear least-squares solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Hard cap on Levenberg–Marquardt iterations.
    pub max_iterations: usize,
    /// Relative SSE reduction below which the fit is considered converged.
    pub ftol: f64,
    /// Relative step size below which the fit is considered converged.
    pub xtol: f64,
    /// Number of log-spaced Kd values used to seed the solver.
    pub kd_seed_steps: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            ftol: 1e-12,
            xtol: 1e-10,
            kd_seed_steps: 40,
        }
    }
}

/// A full run's configuration as understood by the aggregation driver.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdConfig {
    /// Groups with fewer surviving clusters are dropped.
    pub minimum_required_counts: usize,
    /// Per-cluster real-observation threshold; `None` means `max(n - 3, 5)`.
    pub minimum_observations: Option<usize>,
    pub tukey_constant: f64,
    pub bootstrap: bool,
    pub bootstrap_rounds: usize,
    pub bootstrap_max_sample_size: usize,
    /// Worker threads; 1 runs every group sequentially on the calling thread.
    pub workers: usize,
    /// Seed for bootstrap resampling. Each group derives its own stream from
    /// this seed and its label with a fixed hash, so results depend neither on
    /// scheduling nor on the toolchain.
    pub seed: Option<u64>,
    pub solver: SolverOptions,
}

impl Default for KdConfig {
    fn default() -> Self {
        Self {
            minimum_required_counts: 6,
            minimum_observations: None,
            tukey_constant: 1.5,
            bootstrap: true,
            bootstrap_rounds: 100,
            bootstrap_max_sample_size: 2000,
            workers: 1,
            seed: None,
            solver: SolverOptions::default(),
        }
    }
}

impl KdConfig {
    pub fn minimum_observations_for(&self, concentrations: &ConcentrationSeries) -> usize {
        self.minimum_observations
            .unwrap_or_else(|| concentrations.default_minimum_observations())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.workers == 0 {
            return Err(AppError::new(EXIT_INPUT, "Worker count must be >= 1."));
        }
        if !(self.tukey_constant.is_finite() && self.tukey_constant >= 0.0) {
            return Err(AppError::new(EXIT_INPUT, "Tukey constant must be finite and >= 0."));
        }
        if self.bootstrap && (self.bootstrap_rounds == 0 || self.bootstrap_max_sample_size == 0) {
            return Err(AppError::new(
                EXIT_INPUT,
                "Bootstrap rounds and sample size must be > 0 when bootstrapping.",
            ));
        }
        if self.solver.max_iterations == 0 || self.solver.kd_seed_steps < 2 {
            return Err(AppError::new(
                EXIT_INPUT,
                "Solver needs >= 1 iteration and >= 2 Kd seed steps.",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concentration_series_rejects_non_monotonic() {
        let err = ConcentrationSeries::new(vec![1.0, 4.0, 2.0]).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(ConcentrationSeries::new(vec![1.0, 1.0]).is_err());
        assert!(ConcentrationSeries::new(vec![0.0, 1.0]).is_err());
        assert!(ConcentrationSeries::new(vec![]).is_err());
    }

    #[test]
    fn default_minimum_observations() {
        let small = ConcentrationSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        assert_eq!(small.default_minimum_observations(), 5);
        let large = ConcentrationSeries::new((1..=11).map(f64::from).collect()).unwrap();
        assert_eq!(large.default_minimum_observations(), 8);
    }

    #[test]
    fn gradient_counts_only_real_observations() {
        let g = IntensityGradient::new(vec![Some(1.0), None, Some(0.0), None]);
        assert_eq!(g.len(), 4);
        assert_eq!(g.observed_count(), 2);
        assert_eq!(g.observations().collect::<Vec<_>>(), vec![(0, 1.0), (2, 0.0)]);
        assert_eq!(g.get(1), None);
        assert_eq!(g.get(2), Some(0.0));
    }

    #[test]
    fn normalization_keeps_missing_values() {
        let g = IntensityGradient::new(vec![Some(10.0), None, Some(30.0)]);
        let n = g.normalized(10.0, 30.0);
        assert_eq!(n.values(), &[Some(0.0), None, Some(1.0)]);
    }
}
