//! Bounded nonlinear least-squares fit of a binding model.
//!
//! Given:
//! - flat concentrations `x_i`
//! - observed intensities `y_i`
//! - a `BindingModel` (baseline, or background-corrected with fixed constants)
//!
//! we:
//! - seed the solver by a Kd grid search, solving the linear parameters exactly
//!   at every candidate Kd
//! - polish the best candidate with bounded Levenberg–Marquardt
//! - estimate the parameter covariance from `JᵀJ` at the solution
//!
//! Fit failures are values (`FitFailure`), not errors: a group that cannot be fit
//! is insufficient evidence, never a reason to stop the run.

use nalgebra::DMatrix;

use crate::domain::SolverOptions;
use crate::fit::assemble::Observations;
use crate::math::{
    kd_seed_grid, levenberg_marquardt, mean, solve_least_squares, sum_squares, LmError, LmOptions,
};
use crate::models::BindingModel;

/// Best fit of one binding model to one set of observations.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub model: BindingModel,
    pub params: [f64; 3],
    /// `s² · (JᵀJ)⁻¹`; filled with `inf` when it cannot be estimated.
    pub covariance: DMatrix<f64>,
    pub sse: f64,
    pub iterations: usize,
}

impl ModelFit {
    pub fn kd(&self) -> f64 {
        self.params[self.model.kd_index()]
    }

    pub fn delta_y(&self) -> f64 {
        match self.model {
            BindingModel::Hyperbola => self.params[0],
            BindingModel::WithBackground(_) => self.params[1],
        }
    }

    /// Fitted offset, or the fixed background offset for background-corrected fits.
    pub fn offset(&self) -> f64 {
        match self.model {
            BindingModel::Hyperbola => self.params[2],
            BindingModel::WithBackground(bg) => bg.offset,
        }
    }

    pub fn fractional_contribution(&self) -> Option<f64> {
        match self.model {
            BindingModel::Hyperbola => None,
            BindingModel::WithBackground(_) => Some(self.params[0]),
        }
    }

    /// Asymptotic standard error of Kd, when the covariance is finite.
    pub fn kd_standard_error(&self) -> Option<f64> {
        let i = self.model.kd_index();
        let var = self.covariance[(i, i)];
        (var.is_finite() && var >= 0.0).then(|| var.sqrt())
    }
}

/// Why a fit produced no estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitFailure {
    InsufficientData { observations: usize, required: usize },
    Degenerate(&'static str),
    NonConvergence { iterations: usize },
    NumericalOverflow,
}

impl std::fmt::Display for FitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitFailure::InsufficientData {
                observations,
                required,
            } => write!(f, "insufficient data: {observations} observations < {required}"),
            FitFailure::Degenerate(reason) => write!(f, "degenerate input: {reason}"),
            FitFailure::NonConvergence { iterations } => {
                write!(f, "no convergence after {iterations} iterations")
            }
            FitFailure::NumericalOverflow => write!(f, "non-finite values during fit"),
        }
    }
}

impl From<LmError> for FitFailure {
    fn from(e: LmError) -> Self {
        match e {
            LmError::NonFinite => FitFailure::NumericalOverflow,
            LmError::NonConvergence { iterations } => FitFailure::NonConvergence { iterations },
        }
    }
}

/// Fit `model` to `obs` within the model's parameter bounds.
pub fn fit_binding_curve(
    model: &BindingModel,
    obs: &Observations,
    opts: &SolverOptions,
) -> Result<ModelFit, FitFailure> {
    let k = BindingModel::PARAM_COUNT;
    let n = obs.len();
    if n < k {
        return Err(FitFailure::InsufficientData {
            observations: n,
            required: k,
        });
    }
    if obs
        .concentrations
        .iter()
        .chain(&obs.intensities)
        .any(|v| !v.is_finite())
    {
        return Err(FitFailure::NumericalOverflow);
    }
    if obs.unique_concentration_count() < k {
        return Err(FitFailure::Degenerate(
            "fewer distinct concentrations than free parameters",
        ));
    }
    if has_no_signal(&obs.intensities) {
        return Err(FitFailure::Degenerate("all intensities are identical"));
    }

    let init = seed_parameters(model, obs, opts)?;
    let bounds = model.bounds();
    let lm_opts = LmOptions {
        max_iterations: opts.max_iterations,
        ftol: opts.ftol,
        xtol: opts.xtol,
    };
    let sol = levenberg_marquardt(
        model,
        &obs.concentrations,
        &obs.intensities,
        &init,
        &bounds,
        &lm_opts,
    )?;
    if !(sol.params.iter().all(|p| p.is_finite()) && sol.sse.is_finite()) {
        return Err(FitFailure::NumericalOverflow);
    }

    let covariance = estimate_covariance(&sol.jtj, sol.sse, n, k);
    Ok(ModelFit {
        model: *model,
        params: [sol.params[0], sol.params[1], sol.params[2]],
        covariance,
        sse: sol.sse,
        iterations: sol.iterations,
    })
}

fn has_no_signal(intensities: &[f64]) -> bool {
    let (lo, hi) = intensities
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo <= f64::EPSILON * lo.abs().max(hi.abs())
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    params: [f64; 3],
    sse: f64,
}

/// Grid search over Kd with the linear parameters solved exactly.
fn seed_parameters(
    model: &BindingModel,
    obs: &Observations,
    opts: &SolverOptions,
) -> Result<[f64; 3], FitFailure> {
    let (c_min, c_max) = obs
        .concentrations
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| (lo.min(c), hi.max(c)));
    let grid = kd_seed_grid(c_min, c_max, opts.kd_seed_steps)
        .map_err(|_| FitFailure::Degenerate("concentrations do not span a usable Kd range"))?;
    let mean_intensity = mean(&obs.intensities).unwrap_or(0.0);

    let n = obs.len();
    let mut design = DMatrix::<f64>::zeros(n, 2);
    let mut target = nalgebra::DVector::<f64>::zeros(n);
    let mut row = [0.0; 2];
    let mut best: Option<Candidate> = None;

    for (idx, &kd) in grid.iter().enumerate() {
        for i in 0..n {
            target[i] = model.fill_seed_row(obs.concentrations[i], kd, obs.intensities[i], &mut row);
            design[(i, 0)] = row[0];
            design[(i, 1)] = row[1];
        }
        let Some(beta) = solve_least_squares(&design, &target) else {
            continue;
        };
        let params = model.params_from_seed(kd, beta.as_slice(), mean_intensity);
        let sse = sum_squares(model, &obs.concentrations, &obs.intensities, &params);
        if !sse.is_finite() {
            continue;
        }
        // Deterministic selection: minimum SSE, ties broken by grid index.
        let better = match &best {
            None => true,
            Some(b) => sse < b.sse || (sse == b.sse && idx < b.idx),
        };
        if better {
            best = Some(Candidate { idx, params, sse });
        }
    }

    best.map(|c| c.params)
        .ok_or(FitFailure::Degenerate("no Kd seed produced a finite fit"))
}

/// Scale `(JᵀJ)⁻¹` by the residual variance; `inf` everywhere if singular.
fn estimate_covariance(jtj: &DMatrix<f64>, sse: f64, n: usize, k: usize) -> DMatrix<f64> {
    let unavailable = || DMatrix::from_element(k, k, f64::INFINITY);
    if n <= k {
        return unavailable();
    }
    let s2 = sse / (n - k) as f64;
    match jtj.clone().try_inverse() {
        Some(inv) if inv.iter().all(|v| v.is_finite()) => inv * s2,
        _ => unavailable(),
    }
}
