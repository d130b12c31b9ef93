//! Kd seed grid generation.
//!
//! The nonlinear fit is seeded from a deterministic grid search over Kd: for each
//! candidate Kd the remaining parameters are linear and solved exactly, and the
//! best candidate becomes the solver's starting point.
//!
//! The grid spans one decade beyond the measured concentrations on each side,
//! which covers every Kd the titration can resolve.

use crate::error::{AppError, EXIT_INPUT};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(AppError::new(
            EXIT_INPUT,
            format!("Invalid grid range: min={min}, max={max} (must be finite, >0, and max>min)."),
        ));
    }
    if steps < 2 {
        return Err(AppError::new(EXIT_INPUT, "Grid steps must be >= 2."));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Candidate Kd values for a titration spanning `[c_min, c_max]`.
pub fn kd_seed_grid(c_min: f64, c_max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    // A single distinct concentration still gets a usable two-decade window.
    let hi = if c_max > c_min { c_max } else { c_min * 10.0 };
    log_space(c_min / 10.0, hi * 10.0, steps)
}
