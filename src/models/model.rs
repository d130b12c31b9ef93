//! Hyperbolic (single-site saturation) binding models.
//!
//! The fitter relies on three primitive operations:
//! - predict the intensity at a concentration (for residuals)
//! - fill a Jacobian row (for Levenberg–Marquardt)
//! - fill a linear design row at a fixed Kd (for seeding)
//!
//! These are implemented here for each model variant.

use serde::{Deserialize, Serialize};

use crate::domain::BackgroundCurve;
use crate::math::{Bounds, ParametricCurve};

/// Numerically positive floor for parameters that appear in a denominator.
pub const POSITIVE_FLOOR: f64 = 1e-280;

/// `Δy · x / (x + Kd) + c`
pub fn hyperbola(concentration: f64, delta_y: f64, kd: f64, c: f64) -> f64 {
    delta_y * (concentration / (concentration + kd)) + c
}

/// `f · Δy·x/(x+Kd) + (1 - f) · Δy_bg·x/(x+Kd_bg) + c_bg`
pub fn hyperbola_with_background(
    concentration: f64,
    fractional_contribution: f64,
    delta_y: f64,
    kd: f64,
    background: &BackgroundCurve,
) -> f64 {
    fractional_contribution * (delta_y * concentration / (concentration + kd))
        + (1.0 - fractional_contribution) * background_signal(concentration, background)
        + background.offset
}

/// Specific (offset-free) part of the background curve.
fn background_signal(concentration: f64, background: &BackgroundCurve) -> f64 {
    background.delta_y * concentration / (concentration + background.kd)
}

/// A binding model with its fixed constants attached.
///
/// Free parameters, in order:
/// - `Hyperbola`: `[Δy, Kd, c]`
/// - `WithBackground`: `[f, Δy, Kd]` (the background curve is fixed)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BindingModel {
    Hyperbola,
    WithBackground(BackgroundCurve),
}

impl BindingModel {
    /// Both variants have three free parameters.
    pub const PARAM_COUNT: usize = 3;

    /// Human-readable label for terminal output.
    pub fn display_name(&self) -> &'static str {
        match self {
            BindingModel::Hyperbola => "hyperbola",
            BindingModel::WithBackground(_) => "hyperbola+background",
        }
    }

    /// Position of Kd in the parameter vector.
    pub fn kd_index(&self) -> usize {
        match self {
            BindingModel::Hyperbola => 1,
            BindingModel::WithBackground(_) => 2,
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            BindingModel::Hyperbola => Bounds {
                lower: vec![0.0, 0.0, POSITIVE_FLOOR],
                upper: vec![f64::INFINITY, f64::INFINITY, f64::INFINITY],
            },
            BindingModel::WithBackground(_) => Bounds {
                lower: vec![0.0, 0.0, POSITIVE_FLOOR],
                upper: vec![1.0, f64::INFINITY, f64::INFINITY],
            },
        }
    }

    /// Fill the linear design row at a fixed Kd and return the adjusted target.
    ///
    /// - `Hyperbola`: `y = Δy·g + c` → row `[g, 1]`, target `y`
    /// - `WithBackground`: `y - bg - c_bg = (fΔy)·g - f·bg` → row `[g, -bg]`,
    ///   target `y - bg - c_bg`
    ///
    /// where `g = x/(x+Kd)`.
    pub fn fill_seed_row(&self, concentration: f64, kd: f64, intensity: f64, out: &mut [f64; 2]) -> f64 {
        let g = concentration / (concentration + kd);
        match self {
            BindingModel::Hyperbola => {
                out[0] = g;
                out[1] = 1.0;
                intensity
            }
            BindingModel::WithBackground(bg) => {
                let b = background_signal(concentration, bg);
                out[0] = g;
                out[1] = -b;
                intensity - b - bg.offset
            }
        }
    }

    /// Map linear seed coefficients back to a feasible parameter vector.
    pub fn params_from_seed(&self, kd: f64, beta: &[f64], mean_intensity: f64) -> [f64; 3] {
        match self {
            BindingModel::Hyperbola => {
                let (delta_y, c) = (beta[0], beta[1]);
                if delta_y >= 0.0 {
                    [delta_y, kd, c.max(POSITIVE_FLOOR)]
                } else {
                    // Decreasing data has no feasible slope; fall back to a flat line.
                    [0.0, kd, mean_intensity.max(POSITIVE_FLOOR)]
                }
            }
            BindingModel::WithBackground(_) => {
                let f = beta[1].clamp(0.0, 1.0);
                let delta_y = if f > 0.0 { (beta[0] / f).max(0.0) } else { 0.0 };
                [f, delta_y, kd.max(POSITIVE_FLOOR)]
            }
        }
    }
}

impl ParametricCurve for BindingModel {
    fn param_count(&self) -> usize {
        Self::PARAM_COUNT
    }

    fn predict(&self, x: f64, p: &[f64]) -> f64 {
        match self {
            BindingModel::Hyperbola => hyperbola(x, p[0], p[1], p[2]),
            BindingModel::WithBackground(bg) => hyperbola_with_background(x, p[0], p[1], p[2], bg),
        }
    }

    fn fill_jacobian_row(&self, x: f64, p: &[f64], out: &mut [f64]) {
        match self {
            BindingModel::Hyperbola => {
                let (delta_y, kd) = (p[0], p[1]);
                let denom = x + kd;
                out[0] = x / denom;
                out[1] = -delta_y * x / (denom * denom);
                out[2] = 1.0;
            }
            BindingModel::WithBackground(bg) => {
                let (f, delta_y, kd) = (p[0], p[1], p[2]);
                let denom = x + kd;
                let g = x / denom;
                out[0] = delta_y * g - background_signal(x, bg);
                out[1] = f * g;
                out[2] = -f * delta_y * x / (denom * denom);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperbola_is_half_saturated_at_kd() {
        let y = hyperbola(5.0, 100.0, 5.0, 2.0);
        assert!((y - 52.0).abs() < 1e-12);
        assert!((hyperbola(0.0, 100.0, 5.0, 2.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn background_mix_interpolates_between_curves() {
        let bg = BackgroundCurve {
            delta_y: 10.0,
            kd: 1000.0,
            offset: 1.0,
        };
        let x = 50.0;
        let specific = hyperbola(x, 100.0, 5.0, 1.0);
        let nonspecific = hyperbola(x, 10.0, 1000.0, 1.0);
        assert!((hyperbola_with_background(x, 1.0, 100.0, 5.0, &bg) - specific).abs() < 1e-12);
        assert!((hyperbola_with_background(x, 0.0, 100.0, 5.0, &bg) - nonspecific).abs() < 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let bg = BackgroundCurve {
            delta_y: 10.0,
            kd: 300.0,
            offset: 0.5,
        };
        let cases = [
            (BindingModel::Hyperbola, [80.0, 12.0, 3.0]),
            (BindingModel::WithBackground(bg), [0.6, 80.0, 12.0]),
        ];
        for (model, p) in cases {
            for &x in &[0.5, 4.0, 32.0, 256.0] {
                let mut row = [0.0; 3];
                model.fill_jacobian_row(x, &p, &mut row);
                for j in 0..3 {
                    let h = 1e-6 * p[j].abs().max(1.0);
                    let mut hi = p;
                    let mut lo = p;
                    hi[j] += h;
                    lo[j] -= h;
                    let fd = (model.predict(x, &hi) - model.predict(x, &lo)) / (2.0 * h);
                    assert!(
                        (fd - row[j]).abs() < 1e-5 * fd.abs().max(1.0),
                        "{} param {j} at x={x}: analytic {} vs fd {fd}",
                        model.display_name(),
                        row[j]
                    );
                }
            }
        }
    }

    #[test]
    fn seed_params_are_feasible() {
        let model = BindingModel::Hyperbola;
        let p = model.params_from_seed(4.0, &[-3.0, 2.0], 7.0);
        assert!(model.bounds().contains(&p));
        assert_eq!(p, [0.0, 4.0, 7.0]);

        let bg = BackgroundCurve {
            delta_y: 1.0,
            kd: 1.0,
            offset: 0.0,
        };
        let model = BindingModel::WithBackground(bg);
        let p = model.params_from_seed(4.0, &[3.0, 1.5], 0.0);
        assert!(model.bounds().contains(&p));
        assert_eq!(p, [1.0, 3.0, 4.0]);
    }
}
