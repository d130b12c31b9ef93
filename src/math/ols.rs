//! Linear least squares solver.
//!
//! Both binding models are linear in their amplitude-like parameters once the
//! Kd is held fixed, so the fitter seeds itself by solving small problems of the form:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! for each Kd on a log-spaced grid.
//!
//! Implementation choices:
//! - We use SVD so the tall design matrix (many clusters, two columns) is handled
//!   without forming normal equations.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Flat data makes the columns nearly collinear, so the tolerance is relaxed
//!   step by step before giving up.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
