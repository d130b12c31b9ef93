//! Bounded Levenberg–Marquardt solver.
//!
//! Minimizes `Σ (y_i - f(x_i; p))^2` subject to box constraints on `p`.
//!
//! Bounds are handled by projection: every trial point is clamped into the box,
//! and parameters sitting on a bound whose descent direction points outside the
//! box are frozen for that iteration. Damping follows Marquardt's scaling
//! (`λ · diag(JᵀJ)`), which keeps parameters on very different scales (Kd in the
//! thousands, amplitudes near one) well conditioned.

use nalgebra::{DMatrix, DVector};

/// Smallest diagonal used for damping, so unidentifiable parameters get a finite step.
const DAMPING_FLOOR: f64 = 1e-12;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// A curve `f(x; p)` with an analytic Jacobian.
pub trait ParametricCurve {
    fn param_count(&self) -> usize;

    fn predict(&self, x: f64, params: &[f64]) -> f64;

    /// Write `∂f/∂p_j` at `x` into `out[j]`.
    ///
    /// # Panics
    /// Implementations may panic if `out` or `params` is not `param_count()` long.
    fn fill_jacobian_row(&self, x: f64, params: &[f64], out: &mut [f64]);
}

/// Inclusive box constraints. Use `f64::INFINITY` for an open upper end.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn clamp(&self, params: &mut [f64]) {
        for ((p, &lo), &hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.max(lo).min(hi);
        }
    }

    pub fn contains(&self, params: &[f64]) -> bool {
        params
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(&p, (&lo, &hi))| p >= lo && p <= hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
}

/// Converged parameters plus `JᵀJ` evaluated at them (for covariance estimates).
#[derive(Debug, Clone)]
pub struct LmSolution {
    pub params: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    pub jtj: DMatrix<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmError {
    /// The model produced NaN/inf for the data or the starting point.
    NonFinite,
    /// The iteration cap was hit before the convergence tests passed.
    NonConvergence { iterations: usize },
}

/// Run the solver from `init` (clamped into `bounds` first).
pub fn levenberg_marquardt<C: ParametricCurve + ?Sized>(
    curve: &C,
    x: &[f64],
    y: &[f64],
    init: &[f64],
    bounds: &Bounds,
    opts: &LmOptions,
) -> Result<LmSolution, LmError> {
    let k = curve.param_count();
    let n = x.len();

    let mut params = init.to_vec();
    bounds.clamp(&mut params);
    let mut sse = sum_squares(curve, x, y, &params);
    if !sse.is_finite() {
        return Err(LmError::NonFinite);
    }

    let mut jac = DMatrix::<f64>::zeros(n, k);
    let mut lambda = LAMBDA_INIT;

    for iteration in 1..=opts.max_iterations {
        fill_jacobian(curve, x, &params, &mut jac);
        let residuals = residual_vector(curve, x, y, &params);
        let jtj = jac.transpose() * &jac;
        let mut grad = jac.transpose() * residuals;
        if !(jtj.iter().all(|v| v.is_finite()) && grad.iter().all(|v| v.is_finite())) {
            return Err(LmError::NonFinite);
        }

        let frozen: Vec<bool> = (0..k)
            .map(|j| {
                (params[j] <= bounds.lower[j] && grad[j] < 0.0)
                    || (params[j] >= bounds.upper[j] && grad[j] > 0.0)
            })
            .collect();
        for j in 0..k {
            if frozen[j] {
                grad[j] = 0.0;
            }
        }

        if sse == 0.0 || grad.iter().all(|g| *g == 0.0) {
            return Ok(LmSolution {
                params,
                sse,
                iterations: iteration,
                jtj,
            });
        }

        let mut accepted: Option<(Vec<f64>, f64)> = None;
        while lambda <= LAMBDA_MAX {
            let damped = damped_normal_matrix(&jtj, &frozen, lambda);
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let step = chol.solve(&grad);

            let mut candidate: Vec<f64> = params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
            bounds.clamp(&mut candidate);
            let candidate_sse = sum_squares(curve, x, y, &candidate);

            if candidate_sse.is_finite() && candidate_sse <= sse {
                accepted = Some((candidate, candidate_sse));
                lambda = (lambda / 10.0).max(LAMBDA_MIN);
                break;
            }
            lambda *= 10.0;
        }

        // No damping level reduces the SSE: this is a minimum to working precision.
        let Some((candidate, candidate_sse)) = accepted else {
            return Ok(LmSolution {
                params,
                sse,
                iterations: iteration,
                jtj,
            });
        };

        let step_norm = params
            .iter()
            .zip(&candidate)
            .map(|(a, b)| (b - a) * (b - a))
            .sum::<f64>()
            .sqrt();
        let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
        let reduction = sse - candidate_sse;
        let previous_sse = sse;

        params = candidate;
        sse = candidate_sse;

        if reduction <= opts.ftol * previous_sse || step_norm <= opts.xtol * (param_norm + opts.xtol) {
            fill_jacobian(curve, x, &params, &mut jac);
            let jtj = jac.transpose() * &jac;
            return Ok(LmSolution {
                params,
                sse,
                iterations: iteration,
                jtj,
            });
        }
    }

    Err(LmError::NonConvergence {
        iterations: opts.max_iterations,
    })
}

/// Sum of squared residuals; NaN/inf propagate so callers can reject the point.
pub fn sum_squares<C: ParametricCurve + ?Sized>(curve: &C, x: &[f64], y: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - curve.predict(xi, params);
            r * r
        })
        .sum()
}

fn residual_vector<C: ParametricCurve + ?Sized>(
    curve: &C,
    x: &[f64],
    y: &[f64],
    params: &[f64],
) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        x.iter().zip(y).map(|(&xi, &yi)| yi - curve.predict(xi, params)),
    )
}

fn fill_jacobian<C: ParametricCurve + ?Sized>(curve: &C, x: &[f64], params: &[f64], jac: &mut DMatrix<f64>) {
    let mut row = vec![0.0; curve.param_count()];
    for (i, &xi) in x.iter().enumerate() {
        curve.fill_jacobian_row(xi, params, &mut row);
        for (j, v) in row.iter().enumerate() {
            jac[(i, j)] = *v;
        }
    }
}

fn damped_normal_matrix(jtj: &DMatrix<f64>, frozen: &[bool], lambda: f64) -> DMatrix<f64> {
    let mut m = jtj.clone();
    for (j, &is_frozen) in frozen.iter().enumerate() {
        if is_frozen {
            m.row_mut(j).fill(0.0);
            m.column_mut(j).fill(0.0);
            m[(j, j)] = 1.0;
        } else {
            m[(j, j)] += lambda * jtj[(j, j)].max(DAMPING_FLOOR);
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `f(x) = a · exp(-b x)`
    struct Decay;

    impl ParametricCurve for Decay {
        fn param_count(&self) -> usize {
            2
        }

        fn predict(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * (-p[1] * x).exp()
        }

        fn fill_jacobian_row(&self, x: f64, p: &[f64], out: &mut [f64]) {
            let e = (-p[1] * x).exp();
            out[0] = e;
            out[1] = -p[0] * x * e;
        }
    }

    fn opts() -> LmOptions {
        LmOptions {
            max_iterations: 200,
            ftol: 1e-14,
            xtol: 1e-12,
        }
    }

    #[test]
    fn recovers_exact_parameters() {
        let x: Vec<f64> = (0..12).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&xi| Decay.predict(xi, &[3.0, 0.7])).collect();
        let bounds = Bounds {
            lower: vec![0.0, 0.0],
            upper: vec![f64::INFINITY, f64::INFINITY],
        };
        let sol = levenberg_marquardt(&Decay, &x, &y, &[1.0, 0.1], &bounds, &opts()).unwrap();
        assert!((sol.params[0] - 3.0).abs() < 1e-6, "a={}", sol.params[0]);
        assert!((sol.params[1] - 0.7).abs() < 1e-6, "b={}", sol.params[1]);
        assert!(sol.sse < 1e-12);
    }

    #[test]
    fn respects_upper_bound() {
        let x: Vec<f64> = (0..12).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&xi| Decay.predict(xi, &[3.0, 0.7])).collect();
        let bounds = Bounds {
            lower: vec![0.0, 0.0],
            upper: vec![2.0, f64::INFINITY],
        };
        let sol = levenberg_marquardt(&Decay, &x, &y, &[1.0, 0.1], &bounds, &opts()).unwrap();
        assert!(bounds.contains(&sol.params));
        assert!((sol.params[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let x = [0.0, 1.0];
        let y = [1.0, f64::NAN];
        let bounds = Bounds {
            lower: vec![0.0, 0.0],
            upper: vec![f64::INFINITY, f64::INFINITY],
        };
        let err = levenberg_marquardt(&Decay, &x, &y, &[1.0, 1.0], &bounds, &opts()).unwrap_err();
        assert_eq!(err, LmError::NonFinite);
    }
}
