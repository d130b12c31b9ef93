//! Observation assembly: per-cluster gradients → flat fitting arrays.
//!
//! The curve fitter works on parallel `(concentration, intensity)` arrays with one
//! entry per real observation. Two separate drops happen on the way there:
//!
//! 1. whole clusters with too few real observations are discarded
//! 2. individual missing entries of the surviving clusters are skipped

use crate::domain::{ConcentrationSeries, IntensityGradient};
use crate::fit::filter::filter_insufficient_observations;

/// Flat, paired observations ready for fitting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    pub concentrations: Vec<f64>,
    pub intensities: Vec<f64>,
}

impl Observations {
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    pub fn unique_concentration_count(&self) -> usize {
        let mut c = self.concentrations.clone();
        c.sort_by(|a, b| a.total_cmp(b));
        c.dedup();
        c.len()
    }
}

/// Survivors of the observation-count filter plus their flattened observations.
#[derive(Debug, Clone)]
pub struct Assembled<'a> {
    pub clusters: Vec<&'a IntensityGradient>,
    pub observations: Observations,
}

/// Flatten gradients concentration-major, skipping missing entries.
///
/// Positions beyond the end of the concentration series are ignored; length
/// agreement is validated once per group by the driver.
pub fn flatten_observations(
    concentrations: &ConcentrationSeries,
    gradients: &[&IntensityGradient],
) -> Observations {
    FittingInputs::from_buckets(&bucket_by_concentration(gradients), concentrations.as_slice())
        .into_observations()
}

/// Drop clusters below `minimum_observations`, then flatten the rest.
pub fn assemble_observations<'a>(
    concentrations: &ConcentrationSeries,
    gradients: &[&'a IntensityGradient],
    minimum_observations: usize,
) -> Assembled<'a> {
    let clusters = filter_insufficient_observations(gradients, minimum_observations);
    let observations = flatten_observations(concentrations, &clusters);
    Assembled {
        clusters,
        observations,
    }
}

/// Regroup gradients into one bucket of real intensities per concentration index.
pub fn bucket_by_concentration(gradients: &[&IntensityGradient]) -> Vec<Vec<f64>> {
    let width = gradients.iter().map(|g| g.len()).max().unwrap_or(0);
    let mut buckets = vec![Vec::new(); width];
    for gradient in gradients {
        for (index, intensity) in gradient.observations() {
            buckets[index].push(intensity);
        }
    }
    buckets
}

/// Bucketed intensities aligned with the concentrations they were measured at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FittingInputs {
    /// Concentrations with at least one observation.
    pub concentrations: Vec<f64>,
    /// One concentration per observation, in bucket order.
    pub concentrations_per_observation: Vec<f64>,
    /// Non-empty buckets, aligned with `concentrations`.
    pub intensities: Vec<Vec<f64>>,
}

impl FittingInputs {
    pub fn from_buckets(buckets: &[Vec<f64>], all_concentrations: &[f64]) -> Self {
        let mut out = Self::default();
        for (bucket, &concentration) in buckets.iter().zip(all_concentrations) {
            if bucket.is_empty() {
                continue;
            }
            out.concentrations.push(concentration);
            out.concentrations_per_observation
                .extend(std::iter::repeat_n(concentration, bucket.len()));
            out.intensities.push(bucket.clone());
        }
        out
    }

    /// The same data as flat fitting arrays.
    pub fn into_observations(self) -> Observations {
        Observations {
            concentrations: self.concentrations_per_observation,
            intensities: self.intensities.into_iter().flatten().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(values: &[f64]) -> IntensityGradient {
        IntensityGradient::new(
            values
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(*v) })
                .collect(),
        )
    }

    #[test]
    fn buckets_skip_missing_values() {
        let nan = f64::NAN;
        let a = gradient(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = gradient(&[2.0, nan, 3.0, 4.0, 77.0]);
        let c = gradient(&[nan, nan, 34.0, 35.0, 36.0]);
        let buckets = bucket_by_concentration(&[&a, &b, &c]);
        assert_eq!(
            buckets,
            vec![
                vec![1.0, 2.0],
                vec![2.0],
                vec![3.0, 3.0, 34.0],
                vec![4.0, 4.0, 35.0],
                vec![5.0, 77.0, 36.0],
            ]
        );
    }

    #[test]
    fn fitting_inputs_keep_only_observed_concentrations() {
        let all_concentrations = [1.0, 2.0, 4.0, 8.0, 16.0];
        let buckets = vec![
            vec![3.0, 4.0, 3.0, 2.0],
            vec![],
            vec![9.0, 5.0, 6.0, 7.0],
            vec![21.0, 22.0, 21.0, 20.0, 19.0],
            vec![],
        ];
        let inputs = FittingInputs::from_buckets(&buckets, &all_concentrations);
        assert_eq!(inputs.concentrations, vec![1.0, 4.0, 8.0]);
        assert_eq!(
            inputs.intensities,
            vec![
                vec![3.0, 4.0, 3.0, 2.0],
                vec![9.0, 5.0, 6.0, 7.0],
                vec![21.0, 22.0, 21.0, 20.0, 19.0],
            ]
        );
        assert_eq!(
            inputs.concentrations_per_observation,
            vec![1.0, 1.0, 1.0, 1.0, 4.0, 4.0, 4.0, 4.0, 8.0, 8.0, 8.0, 8.0, 8.0]
        );

        let obs = inputs.into_observations();
        assert_eq!(obs.len(), 13);
        assert_eq!(obs.unique_concentration_count(), 3);
        assert_eq!(obs.intensities[4], 9.0);
        assert_eq!(obs.concentrations[4], 4.0);
    }

    #[test]
    fn flatten_drops_points_not_clusters() {
        let nan = f64::NAN;
        let concentrations = ConcentrationSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let a = gradient(&[10.0, nan, 30.0]);
        let b = gradient(&[11.0, 21.0, 31.0]);
        let obs = flatten_observations(&concentrations, &[&a, &b]);
        assert_eq!(obs.concentrations, vec![1.0, 1.0, 2.0, 4.0, 4.0]);
        assert_eq!(obs.intensities, vec![10.0, 11.0, 21.0, 30.0, 31.0]);
    }

    #[test]
    fn assembly_drops_sparse_clusters_first() {
        let nan = f64::NAN;
        let concentrations = ConcentrationSeries::new(vec![1.0, 2.0, 4.0, 8.0]).unwrap();
        let dense = gradient(&[1.0, 2.0, nan, 4.0]);
        let sparse = gradient(&[1.0, nan, nan, 4.0]);
        let assembled = assemble_observations(&concentrations, &[&dense, &sparse], 3);
        assert_eq!(assembled.clusters, vec![&dense]);
        assert_eq!(assembled.observations.concentrations, vec![1.0, 2.0, 8.0]);

        let none = assemble_observations(&concentrations, &[&sparse], 3);
        assert!(none.clusters.is_empty());
        assert!(none.observations.is_empty());
    }
}
