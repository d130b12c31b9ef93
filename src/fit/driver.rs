//! KD aggregation driver.
//!
//! Every group moves through the same pipeline:
//!
//! `outlier filter -> assembly -> cluster-count gate -> fit -> bootstrap -> emit`
//!
//! and ends either emitted or dropped. Groups share nothing mutable, so with more
//! than one worker they are fit on a rayon pool and their results funnel through a
//! single channel into the caller's sink. Statistical failures drop one group;
//! invariant violations abort the whole run.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ConcentrationSeries, FitResult, FittingGroup, IntensityGradient, KdConfig};
use crate::error::AppError;
use crate::fit::assemble::assemble_observations;
use crate::fit::bootstrap::{BootstrapOptions, bootstrap_kd};
use crate::fit::filter::filter_unusual_intensities;
use crate::fit::fitter::{FitFailure, fit_binding_curve};
use crate::math::StableSeed;
use crate::models::BindingModel;

/// Why a group produced no result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropReason {
    TooFewClusters { surviving: usize, required: usize },
    FitFailed(FitFailure),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::TooFewClusters {
                surviving,
                required,
            } => write!(f, "{surviving} clusters survived filtering, {required} required"),
            DropReason::FitFailed(failure) => write!(f, "fit failed: {failure}"),
        }
    }
}

/// Terminal state of one group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    Emitted {
        result: FitResult,
        bootstrap_exhausted: bool,
    },
    Dropped {
        label: String,
        reason: DropReason,
    },
}

/// Tallies for one run. Only groups completed before a cancellation are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    pub attempted: usize,
    pub fit: usize,
    pub dropped_insufficient: usize,
    pub dropped_fit_failure: usize,
    pub bootstrap_exhausted: usize,
    pub cancelled: bool,
}

impl DriverSummary {
    fn record(&mut self, outcome: &GroupOutcome) {
        self.attempted += 1;
        match outcome {
            GroupOutcome::Emitted {
                bootstrap_exhausted,
                ..
            } => {
                self.fit += 1;
                if *bootstrap_exhausted {
                    self.bootstrap_exhausted += 1;
                }
            }
            GroupOutcome::Dropped {
                reason: DropReason::TooFewClusters { .. },
                ..
            } => self.dropped_insufficient += 1,
            GroupOutcome::Dropped {
                reason: DropReason::FitFailed(_),
                ..
            } => self.dropped_fit_failure += 1,
        }
    }
}

/// Fits groups against one concentration series with one binding model.
#[derive(Debug, Clone, Copy)]
pub struct KdDriver<'a> {
    concentrations: &'a ConcentrationSeries,
    model: BindingModel,
    config: &'a KdConfig,
}

impl<'a> KdDriver<'a> {
    pub fn new(
        concentrations: &'a ConcentrationSeries,
        model: BindingModel,
        config: &'a KdConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            concentrations,
            model,
            config,
        })
    }

    /// Run one group through the pipeline.
    pub fn fit_group(&self, group: &FittingGroup) -> Result<GroupOutcome, AppError> {
        let n = self.concentrations.len();
        if let Some(bad) = group.gradients.iter().find(|g| g.len() != n) {
            return Err(AppError::invariant(format!(
                "group '{}' has a gradient with {} values for {n} concentrations",
                group.label,
                bad.len()
            )));
        }

        let refs: Vec<&IntensityGradient> = group.gradients.iter().collect();
        let kept = filter_unusual_intensities(&refs, self.config.tukey_constant)?;
        let minimum_observations = self.config.minimum_observations_for(self.concentrations);
        let assembled = assemble_observations(self.concentrations, &kept, minimum_observations);

        let required = self.config.minimum_required_counts;
        if assembled.clusters.len() < required {
            return Ok(self.dropped(
                group,
                DropReason::TooFewClusters {
                    surviving: assembled.clusters.len(),
                    required,
                },
            ));
        }

        let fit = match fit_binding_curve(&self.model, &assembled.observations, &self.config.solver) {
            Ok(fit) => fit,
            Err(failure) => return Ok(self.dropped(group, DropReason::FitFailed(failure))),
        };

        let mut bootstrap_exhausted = false;
        let kd_uncertainty = if self.config.bootstrap {
            let opts = BootstrapOptions {
                rounds: self.config.bootstrap_rounds,
                max_sample_size: self.config.bootstrap_max_sample_size,
                minimum_observations,
            };
            let mut rng = group_rng(self.config.seed, &group.label);
            // Resample the outlier-filtered cohort; the assembler's observation
            // filter runs again inside every round.
            match bootstrap_kd(&self.model, self.concentrations, &kept, &opts, &self.config.solver, &mut rng) {
                Ok(estimate) => Some(estimate.standard_deviation()),
                Err(exhausted) => {
                    warn!(label = %group.label, %exhausted, "kd uncertainty unavailable");
                    bootstrap_exhausted = true;
                    None
                }
            }
        } else {
            Some(0.0)
        };

        debug!(
            label = %group.label,
            kd = fit.kd(),
            kd_se = ?fit.kd_standard_error(),
            clusters = assembled.clusters.len(),
            observations = assembled.observations.len(),
            iterations = fit.iterations,
            "group fit"
        );

        Ok(GroupOutcome::Emitted {
            result: FitResult {
                label: group.label.clone(),
                kd: fit.kd(),
                kd_uncertainty,
                delta_y: fit.delta_y(),
                offset: fit.offset(),
                fractional_contribution: fit.fractional_contribution(),
                clusters: assembled.clusters.len(),
                observations: assembled.observations.len(),
            },
            bootstrap_exhausted,
        })
    }

    fn dropped(&self, group: &FittingGroup, reason: DropReason) -> GroupOutcome {
        debug!(label = %group.label, %reason, "group dropped");
        GroupOutcome::Dropped {
            label: group.label.clone(),
            reason,
        }
    }

    /// Fit every group, handing each emitted result to `sink` as it completes.
    ///
    /// Results arrive in completion order. Returning `ControlFlow::Break` from the
    /// sink stops the run: no further results are delivered and groups still in
    /// flight are discarded.
    pub fn run<F>(&self, groups: &[FittingGroup], mut sink: F) -> Result<DriverSummary, AppError>
    where
        F: FnMut(FitResult) -> ControlFlow<()>,
    {
        info!(
            groups = groups.len(),
            workers = self.config.workers,
            model = self.model.display_name(),
            bootstrap = self.config.bootstrap,
            "kd aggregation started"
        );

        let summary = if self.config.workers <= 1 {
            self.run_sequential(groups, &mut sink)?
        } else {
            self.run_parallel(groups, &mut sink)?
        };

        info!(
            fit = summary.fit,
            attempted = summary.attempted,
            dropped_insufficient = summary.dropped_insufficient,
            dropped_fit_failure = summary.dropped_fit_failure,
            bootstrap_exhausted = summary.bootstrap_exhausted,
            cancelled = summary.cancelled,
            "kd aggregation finished"
        );
        Ok(summary)
    }

    /// Run to completion and collect every emitted result.
    pub fn collect(&self, groups: &[FittingGroup]) -> Result<(Vec<FitResult>, DriverSummary), AppError> {
        let mut results = Vec::new();
        let summary = self.run(groups, |r| {
            results.push(r);
            ControlFlow::Continue(())
        })?;
        Ok((results, summary))
    }

    fn run_sequential<F>(&self, groups: &[FittingGroup], sink: &mut F) -> Result<DriverSummary, AppError>
    where
        F: FnMut(FitResult) -> ControlFlow<()>,
    {
        let mut summary = DriverSummary::default();
        for group in groups {
            let outcome = self.fit_group(group)?;
            if deliver(&mut summary, outcome, sink).is_break() {
                summary.cancelled = true;
                break;
            }
        }
        Ok(summary)
    }

    fn run_parallel<F>(&self, groups: &[FittingGroup], sink: &mut F) -> Result<DriverSummary, AppError>
    where
        F: FnMut(FitResult) -> ControlFlow<()>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| AppError::new(2, format!("Failed to build worker pool: {e}")))?;

        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Result<GroupOutcome, AppError>>();
        let mut summary = DriverSummary::default();
        let mut failure: Option<AppError> = None;

        let joined = std::thread::scope(|scope| {
            let producer = scope.spawn(|| {
                pool.install(|| {
                    groups.par_iter().try_for_each_with(tx, |tx, group| {
                        if stop.load(Ordering::Relaxed) {
                            return Err(());
                        }
                        let outcome = self.fit_group(group);
                        let fatal = outcome.is_err();
                        if tx.send(outcome).is_err() || fatal {
                            return Err(());
                        }
                        Ok(())
                    })
                })
            });

            // The channel closes once every worker has dropped its sender.
            for message in rx {
                if summary.cancelled || failure.is_some() {
                    continue;
                }
                match message {
                    Ok(outcome) => {
                        if deliver(&mut summary, outcome, sink).is_break() {
                            summary.cancelled = true;
                            stop.store(true, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        stop.store(true, Ordering::Relaxed);
                    }
                }
            }
            producer.join()
        });

        if let Some(e) = failure {
            return Err(e);
        }
        if joined.is_err() {
            return Err(AppError::invariant("A worker thread panicked while fitting."));
        }
        Ok(summary)
    }
}

fn deliver<F>(summary: &mut DriverSummary, outcome: GroupOutcome, sink: &mut F) -> ControlFlow<()>
where
    F: FnMut(FitResult) -> ControlFlow<()>,
{
    summary.record(&outcome);
    match outcome {
        GroupOutcome::Emitted { result, .. } => sink(result),
        GroupOutcome::Dropped { .. } => ControlFlow::Continue(()),
    }
}

/// Per-group bootstrap stream.
///
/// With a seed, the stream depends only on the seed and the label, so results do
/// not change with the worker count or completion order.
fn group_rng(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(seed) => {
            StdRng::seed_from_u64(StableSeed::new(seed).with_bytes(label.as_bytes()).finish())
        }
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackgroundCurve;
    use crate::models::{hyperbola, hyperbola_with_background};

    fn concentrations() -> ConcentrationSeries {
        ConcentrationSeries::new(vec![0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0]).unwrap()
    }

    /// `count` exact curves sharing `kd`, with evenly spread amplitudes and offsets.
    fn clean_group(label: &str, kd: f64, count: usize) -> FittingGroup {
        let cs = concentrations();
        let gradients = (0..count)
            .map(|i| {
                let dy = 90.0 + 2.0 * i as f64;
                let c = 1.0 + 0.1 * i as f64;
                let values: Vec<f64> = cs.as_slice().iter().map(|&x| hyperbola(x, dy, kd, c)).collect();
                IntensityGradient::observed(&values)
            })
            .collect();
        FittingGroup::new(label, gradients)
    }

    fn flat_group(label: &str, count: usize) -> FittingGroup {
        let values = vec![3.0; concentrations().len()];
        FittingGroup::new(label, vec![IntensityGradient::observed(&values); count])
    }

    fn config(bootstrap: bool, workers: usize) -> KdConfig {
        KdConfig {
            bootstrap,
            bootstrap_rounds: 20,
            workers,
            seed: Some(17),
            ..KdConfig::default()
        }
    }

    fn sorted(mut results: Vec<FitResult>) -> Vec<FitResult> {
        results.sort_by(|a, b| a.label.cmp(&b.label));
        results
    }

    #[test]
    fn clean_group_is_emitted_and_flat_group_dropped() {
        let cs = concentrations();
        let cfg = config(true, 1);
        let driver = KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).unwrap();
        let groups = vec![clean_group("ACGT", 5.0, 10), flat_group("TTTT", 8)];

        let (results, summary) = driver.collect(&groups).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.label, "ACGT");
        assert!((r.kd - 5.0).abs() / 5.0 < 0.01, "kd={}", r.kd);
        let sd = r.kd_uncertainty.unwrap();
        assert!(sd.is_finite() && sd >= 0.0);
        assert_eq!(r.clusters, 10);
        assert_eq!(r.observations, 110);
        assert_eq!(r.fractional_contribution, None);

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.fit, 1);
        assert_eq!(summary.dropped_fit_failure, 1);
        assert!(!summary.cancelled);
    }

    #[test]
    fn too_few_clusters_never_emit() {
        let cs = concentrations();
        let cfg = config(false, 1);
        let driver = KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).unwrap();
        let group = clean_group("short", 5.0, 5);
        match driver.fit_group(&group).unwrap() {
            GroupOutcome::Dropped { reason, .. } => assert_eq!(
                reason,
                DropReason::TooFewClusters {
                    surviving: 5,
                    required: 6
                }
            ),
            other => panic!("expected a drop, got {other:?}"),
        }
        let (results, summary) = driver.collect(&[group]).unwrap();
        assert!(results.is_empty());
        assert_eq!(summary.dropped_insufficient, 1);
    }

    #[test]
    fn skipped_bootstrap_reports_zero_uncertainty() {
        let cs = concentrations();
        let cfg = config(false, 1);
        let driver = KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).unwrap();
        let (results, _) = driver.collect(&[clean_group("g", 20.0, 8)]).unwrap();
        assert_eq!(results[0].kd_uncertainty, Some(0.0));
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let cs = concentrations();
        let groups: Vec<FittingGroup> = (0..9)
            .map(|i| {
                if i % 4 == 3 {
                    flat_group(&format!("g{i}"), 7)
                } else {
                    clean_group(&format!("g{i}"), 2.0 + 3.0 * i as f64, 6 + i)
                }
            })
            .collect();

        for bootstrap in [false, true] {
            let one = config(bootstrap, 1);
            let many = config(bootstrap, 4);
            let (a, sa) = KdDriver::new(&cs, BindingModel::Hyperbola, &one)
                .unwrap()
                .collect(&groups)
                .unwrap();
            let (b, sb) = KdDriver::new(&cs, BindingModel::Hyperbola, &many)
                .unwrap()
                .collect(&groups)
                .unwrap();
            assert_eq!(sorted(a), sorted(b));
            assert_eq!(sa, sb);
            assert_eq!(sa.fit, 7);
        }
    }

    #[test]
    fn sink_break_stops_delivery() {
        let cs = concentrations();
        let groups: Vec<FittingGroup> = (0..6).map(|i| clean_group(&format!("g{i}"), 4.0, 8)).collect();
        for workers in [1, 3] {
            let cfg = config(false, workers);
            let driver = KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).unwrap();
            let mut delivered = 0;
            let summary = driver
                .run(&groups, |_| {
                    delivered += 1;
                    ControlFlow::Break(())
                })
                .unwrap();
            assert_eq!(delivered, 1);
            assert!(summary.cancelled);
            assert_eq!(summary.fit, 1);
        }
    }

    #[test]
    fn mismatched_gradient_length_aborts_the_run() {
        let cs = concentrations();
        let mut broken = clean_group("broken", 5.0, 8);
        broken.gradients[2] = IntensityGradient::observed(&[1.0, 2.0, 3.0]);
        let groups = vec![clean_group("ok", 5.0, 8), broken];
        for workers in [1, 2] {
            let cfg = config(false, workers);
            let driver = KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).unwrap();
            let err = driver.collect(&groups).unwrap_err();
            assert!(err.is_invariant_violation(), "{err}");
        }
    }

    #[test]
    fn background_model_reports_fraction_and_background_offset() {
        let cs = concentrations();
        let bg = BackgroundCurve {
            delta_y: 40.0,
            kd: 900.0,
            offset: 2.0,
        };
        let gradients = (0..8)
            .map(|i| {
                let f = 0.6 + 0.02 * i as f64;
                let values: Vec<f64> = cs
                    .as_slice()
                    .iter()
                    .map(|&x| hyperbola_with_background(x, f, 100.0, 8.0, &bg))
                    .collect();
                IntensityGradient::observed(&values)
            })
            .collect();
        let cfg = config(true, 1);
        let driver = KdDriver::new(&cs, BindingModel::WithBackground(bg), &cfg).unwrap();
        let (results, _) = driver.collect(&[FittingGroup::new("bg", gradients)]).unwrap();
        let r = &results[0];
        assert!((r.kd - 8.0).abs() / 8.0 < 0.05, "kd={}", r.kd);
        assert_eq!(r.offset, 2.0);
        let f = r.fractional_contribution.unwrap();
        assert!((0.0..=1.0).contains(&f));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cs = concentrations();
        let cfg = KdConfig {
            workers: 0,
            ..KdConfig::default()
        };
        assert!(KdDriver::new(&cs, BindingModel::Hyperbola, &cfg).is_err());
    }

    #[test]
    fn seeded_group_streams_are_reproducible() {
        use rand::Rng;
        let a: u64 = group_rng(Some(1), "ACGT").r#gen();
        let b: u64 = group_rng(Some(1), "ACGT").r#gen();
        let c: u64 = group_rng(Some(1), "TGCA").r#gen();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let pinned: u64 = StdRng::seed_from_u64(0x579f_0d83_cd3c_b7a9).r#gen();
        assert_eq!(group_rng(Some(42), "SEQ0001").r#gen::<u64>(), pinned);
    }
}
