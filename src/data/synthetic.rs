//! Synthetic CHAMP experiments with known Kds.
//!
//! Each group gets a log-uniform Kd; each of its clusters gets its own amplitude
//! and offset jitter, Gaussian read noise, random missing observations, and
//! occasionally one spiked intensity. A negative-control group with a weak,
//! non-specific Kd can be added for the two-stage background workflow.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{ConcentrationSeries, FittingGroup, IntensityGradient};
use crate::error::AppError;
use crate::math::StableSeed;
use crate::models::hyperbola;

/// Label given to the simulated negative-control group.
pub const NEGATIVE_CONTROL_LABEL: &str = "NEG_CTRL";

/// Intensity multiplier applied to a spiked observation.
const SPIKE_FACTOR: f64 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub concentrations: Vec<f64>,
    pub groups: usize,
    pub clusters_per_group: usize,
    pub kd_min: f64,
    pub kd_max: f64,
    pub delta_y: f64,
    pub offset: f64,
    /// Relative spread of per-cluster amplitudes.
    pub amplitude_jitter: f64,
    /// Standard deviation of additive read noise.
    pub noise_sd: f64,
    pub missing_prob: f64,
    pub outlier_prob: f64,
    /// Kd of the negative-control group; `None` omits the group.
    pub negative_control_kd: Option<f64>,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            concentrations: vec![0.91, 2.74, 8.23, 24.7, 74.1, 222.0, 667.0, 2000.0],
            groups: 50,
            clusters_per_group: 20,
            kd_min: 1.0,
            kd_max: 500.0,
            delta_y: 1000.0,
            offset: 50.0,
            amplitude_jitter: 0.1,
            noise_sd: 10.0,
            missing_prob: 0.05,
            outlier_prob: 0.02,
            negative_control_kd: Some(5000.0),
            seed: 42,
        }
    }
}

/// Ground truth for one simulated group.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTruth {
    pub label: String,
    pub kd: f64,
    pub delta_y: f64,
    pub offset: f64,
    pub clusters: usize,
}

/// A simulated experiment, both as fitting groups and as flat read tables.
#[derive(Debug, Clone)]
pub struct SimulatedExperiment {
    pub concentrations: ConcentrationSeries,
    pub groups: Vec<FittingGroup>,
    pub truth: Vec<SimulatedTruth>,
}

impl SimulatedExperiment {
    /// `(read name, gradient)` rows, with read names unique across groups.
    pub fn intensity_rows(&self) -> Vec<(String, &IntensityGradient)> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.gradients
                    .iter()
                    .enumerate()
                    .map(move |(i, gradient)| (read_name(&g.label, i), gradient))
            })
            .collect()
    }

    /// `label -> read names`, matching [`Self::intensity_rows`].
    pub fn read_names(&self) -> Vec<(String, Vec<String>)> {
        self.groups
            .iter()
            .map(|g| {
                let reads = (0..g.gradients.len()).map(|i| read_name(&g.label, i)).collect();
                (g.label.clone(), reads)
            })
            .collect()
    }
}

fn read_name(label: &str, index: usize) -> String {
    format!("{label}:{:05}", index + 1)
}

pub fn simulate_experiment(config: &SimulationConfig) -> Result<SimulatedExperiment, AppError> {
    validate(config)?;
    let concentrations = ConcentrationSeries::new(config.concentrations.clone())?;

    let mut rng = StdRng::seed_from_u64(simulation_seed(config));
    let noise = Normal::new(0.0, config.noise_sd)
        .map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?;

    let mut groups = Vec::with_capacity(config.groups + 1);
    let mut truth = Vec::with_capacity(config.groups + 1);

    let (ln_min, ln_max) = (config.kd_min.ln(), config.kd_max.ln());
    let labelled_kds = (0..config.groups).map(|i| {
        let u: f64 = rng.r#gen();
        (format!("SEQ{:04}", i + 1), (ln_min + u * (ln_max - ln_min)).exp())
    });
    let mut specs: Vec<(String, f64)> = labelled_kds.collect();
    if let Some(kd) = config.negative_control_kd {
        specs.push((NEGATIVE_CONTROL_LABEL.to_string(), kd));
    }

    for (label, kd) in specs {
        let gradients = (0..config.clusters_per_group)
            .map(|_| simulate_cluster(&mut rng, &noise, concentrations.as_slice(), kd, config))
            .collect();
        truth.push(SimulatedTruth {
            label: label.clone(),
            kd,
            delta_y: config.delta_y,
            offset: config.offset,
            clusters: config.clusters_per_group,
        });
        groups.push(FittingGroup::new(label, gradients));
    }

    Ok(SimulatedExperiment {
        concentrations,
        groups,
        truth,
    })
}

fn simulate_cluster(
    rng: &mut StdRng,
    noise: &Normal<f64>,
    concentrations: &[f64],
    kd: f64,
    config: &SimulationConfig,
) -> IntensityGradient {
    let amplitude = config.delta_y * (1.0 + config.amplitude_jitter * (2.0 * rng.r#gen::<f64>() - 1.0));
    let spike_at = rng
        .gen_bool(config.outlier_prob)
        .then(|| rng.gen_range(0..concentrations.len()));

    let values = concentrations
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            if rng.gen_bool(config.missing_prob) {
                return None;
            }
            let mut v = hyperbola(x, amplitude, kd, config.offset) + noise.sample(&mut *rng);
            if spike_at == Some(i) {
                v *= SPIKE_FACTOR;
            }
            Some(v.max(0.0))
        })
        .collect();
    IntensityGradient::new(values)
}

fn validate(config: &SimulationConfig) -> Result<(), AppError> {
    if config.groups == 0 && config.negative_control_kd.is_none() {
        return Err(AppError::new(2, "Simulation needs at least one group."));
    }
    if config.clusters_per_group == 0 {
        return Err(AppError::new(2, "Clusters per group must be > 0."));
    }
    if !(config.kd_min.is_finite() && config.kd_min > 0.0 && config.kd_max >= config.kd_min && config.kd_max.is_finite()) {
        return Err(AppError::new(2, "Invalid Kd range for simulation."));
    }
    if let Some(kd) = config.negative_control_kd {
        if !(kd.is_finite() && kd > 0.0) {
            return Err(AppError::new(2, "Negative-control Kd must be finite and > 0."));
        }
    }
    let is_prob = |p: f64| (0.0..=1.0).contains(&p);
    if !(is_prob(config.missing_prob) && is_prob(config.outlier_prob)) {
        return Err(AppError::new(2, "Probabilities must lie in [0, 1]."));
    }
    if !(config.noise_sd.is_finite() && config.noise_sd >= 0.0) {
        return Err(AppError::new(2, "Noise standard deviation must be finite and >= 0."));
    }
    if !(config.amplitude_jitter.is_finite() && (0.0..1.0).contains(&config.amplitude_jitter)) {
        return Err(AppError::new(2, "Amplitude jitter must lie in [0, 1)."));
    }
    Ok(())
}

fn simulation_seed(config: &SimulationConfig) -> u64 {
    config
        .concentrations
        .iter()
        .fold(
            StableSeed::new(config.seed)
                .with_u64(config.groups as u64)
                .with_u64(config.clusters_per_group as u64),
            |acc, c| acc.with_u64(c.to_bits()),
        )
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig {
            groups: 4,
            clusters_per_group: 12,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn same_seed_same_experiment() {
        let a = simulate_experiment(&small()).unwrap();
        let b = simulate_experiment(&small()).unwrap();
        assert_eq!(a.groups, b.groups);
        assert_eq!(a.truth, b.truth);

        let c = simulate_experiment(&SimulationConfig { seed: 7, ..small() }).unwrap();
        assert_ne!(a.groups, c.groups);
    }

    #[test]
    fn shapes_and_truth_line_up() {
        let exp = simulate_experiment(&small()).unwrap();
        assert_eq!(exp.groups.len(), 5);
        assert_eq!(exp.groups[4].label, NEGATIVE_CONTROL_LABEL);
        for (g, t) in exp.groups.iter().zip(&exp.truth) {
            assert_eq!(g.label, t.label);
            assert_eq!(g.gradients.len(), 12);
            assert!(g.gradients.iter().all(|x| x.len() == exp.concentrations.len()));
            assert!(t.kd >= 1.0 && (t.kd <= 500.0 || t.label == NEGATIVE_CONTROL_LABEL));
        }
    }

    #[test]
    fn read_tables_are_consistent() {
        let exp = simulate_experiment(&small()).unwrap();
        let rows = exp.intensity_rows();
        let names = exp.read_names();
        assert_eq!(rows.len(), 5 * 12);
        assert_eq!(names.iter().map(|(_, r)| r.len()).sum::<usize>(), rows.len());
        assert_eq!(names[0].1[0], rows[0].0);
    }

    #[test]
    fn noiseless_clusters_follow_the_curve() {
        let cfg = SimulationConfig {
            amplitude_jitter: 0.0,
            noise_sd: 0.0,
            missing_prob: 0.0,
            outlier_prob: 0.0,
            ..small()
        };
        let exp = simulate_experiment(&cfg).unwrap();
        let truth = &exp.truth[0];
        for (i, &x) in exp.concentrations.as_slice().iter().enumerate() {
            let want = hyperbola(x, truth.delta_y, truth.kd, truth.offset);
            assert!((exp.groups[0].gradients[0].get(i).unwrap() - want).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(simulate_experiment(&SimulationConfig { kd_min: 0.0, ..small() }).is_err());
        assert!(simulate_experiment(&SimulationConfig { missing_prob: 1.5, ..small() }).is_err());
        let err = simulate_experiment(&SimulationConfig {
            concentrations: vec![2.0, 1.0],
            ..small()
        })
        .unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
