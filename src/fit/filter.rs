//! Cluster-level quality filters.
//!
//! - Tukey-fence outlier rejection, computed independently per concentration
//! - minimum real-observation count per cluster
//!
//! Both filters borrow gradients and return the survivors; nothing is copied or
//! mutated, so a group's gradients can be shared across the primary fit and the
//! bootstrap.

use std::collections::BTreeSet;

use crate::domain::IntensityGradient;
use crate::error::AppError;
use crate::math::quartiles;

/// Indices of gradients with at least one observation outside the Tukey fence
/// `[Q1 - k·IQR, Q3 + k·IQR]` of its concentration.
///
/// Missing observations neither contribute to a fence nor get judged by one.
/// Gradients of different lengths violate the pipeline's invariants and abort.
pub fn unusual_intensity_indices(
    gradients: &[&IntensityGradient],
    tukey_constant: f64,
) -> Result<BTreeSet<usize>, AppError> {
    let mut bad = BTreeSet::new();
    let Some(first) = gradients.first() else {
        return Ok(bad);
    };
    let width = first.len();
    if let Some(other) = gradients.iter().find(|g| g.len() != width) {
        return Err(AppError::invariant(format!(
            "gradients in one group must share a length (found {width} and {}); \
             missing observations must be explicit",
            other.len()
        )));
    }

    let mut column = Vec::with_capacity(gradients.len());
    for index in 0..width {
        column.clear();
        column.extend(gradients.iter().filter_map(|g| g.get(index)));
        // Every cluster is missing here, so this concentration has no fence.
        let Some((q1, q3)) = quartiles(&mut column) else {
            continue;
        };
        let iqr = q3 - q1;
        let (lo, hi) = (q1 - tukey_constant * iqr, q3 + tukey_constant * iqr);
        for (n, gradient) in gradients.iter().enumerate() {
            if let Some(v) = gradient.get(index) {
                if v < lo || v > hi {
                    bad.insert(n);
                }
            }
        }
    }
    Ok(bad)
}

/// Drop every gradient that has an outlier at any concentration.
pub fn filter_unusual_intensities<'a>(
    gradients: &[&'a IntensityGradient],
    tukey_constant: f64,
) -> Result<Vec<&'a IntensityGradient>, AppError> {
    let bad = unusual_intensity_indices(gradients, tukey_constant)?;
    Ok(gradients
        .iter()
        .enumerate()
        .filter(|(n, _)| !bad.contains(n))
        .map(|(_, g)| *g)
        .collect())
}

/// Keep gradients with at least `minimum_observations` real values.
pub fn filter_insufficient_observations<'a>(
    gradients: &[&'a IntensityGradient],
    minimum_observations: usize,
) -> Vec<&'a IntensityGradient> {
    gradients
        .iter()
        .copied()
        .filter(|g| g.observed_count() >= minimum_observations)
        .collect()
}
