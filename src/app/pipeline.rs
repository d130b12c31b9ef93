//! Shared "fit pipeline" logic used by the CLI.
//!
//! ingest -> group -> (negative control fit) -> driver -> streamed Kd table
//!
//! With a negative control, its baseline fit becomes the fixed background curve
//! for every group; without one, every group uses the baseline model.

use std::ops::ControlFlow;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::domain::{BackgroundCurve, ConcentrationSeries, FitResult, FittingGroup, KdConfig};
use crate::error::{AppError, EXIT_INPUT, EXIT_INSUFFICIENT, EXIT_NUMERICAL};
use crate::fit::{DriverSummary, DropReason, FitFailure, GroupOutcome, KdDriver};
use crate::io::{EnergyUnits, GroupingStats, KdTableWriter, NegativeControlSummary, RowError};
use crate::models::BindingModel;

/// Files and options for one `champ fit` run.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub intensities: PathBuf,
    pub read_names: PathBuf,
    pub output: PathBuf,
    pub negative_control: Option<String>,
    pub normalization: Option<(f64, f64)>,
    pub energy: EnergyUnits,
}

/// Outcome of fitting every group of one experiment.
#[derive(Debug, Clone)]
pub struct GroupFits {
    pub model: BindingModel,
    pub negative_control: Option<NegativeControlSummary>,
    pub results: Vec<FitResult>,
    pub summary: DriverSummary,
}

/// All computed outputs of a single `champ fit` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub concentrations: ConcentrationSeries,
    pub grouping: GroupingStats,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
    pub fits: GroupFits,
}

/// Execute the full pipeline, streaming the Kd table to `request.output`.
pub fn run_fit(request: &FitRequest, config: &KdConfig) -> Result<FitRun, AppError> {
    let table = crate::io::load_intensity_table(&request.intensities)?;
    for e in &table.row_errors {
        warn!(line = e.line, id = e.id.as_deref().unwrap_or(""), message = %e.message, "skipped intensity row");
    }
    let read_names = crate::io::load_read_names(&request.read_names)?;
    let (groups, grouping) = crate::io::build_groups(&read_names, &table, request.normalization);
    info!(
        clusters = table.gradients.len(),
        concentrations = table.concentrations.len(),
        labels = grouping.labels_read,
        groups = grouping.groups,
        reads_matched = grouping.reads_matched,
        reads_listed = grouping.reads_listed,
        "inputs loaded"
    );

    let mut writer = KdTableWriter::create(&request.output, request.energy)?;
    let fits = fit_groups(
        &table.concentrations,
        &groups,
        request.negative_control.as_deref(),
        config,
        |r| writer.write(r),
    )?;
    let rows = writer.finish()?;
    info!(rows, path = %request.output.display(), "kd table written");

    Ok(FitRun {
        concentrations: table.concentrations,
        grouping,
        rows_read: table.rows_read,
        row_errors: table.row_errors,
        fits,
    })
}

/// Fit every group, calling `on_result` for each emitted result as it completes.
///
/// An error from `on_result` cancels the run and is returned.
pub fn fit_groups<F>(
    concentrations: &ConcentrationSeries,
    groups: &[FittingGroup],
    negative_control: Option<&str>,
    config: &KdConfig,
    mut on_result: F,
) -> Result<GroupFits, AppError>
where
    F: FnMut(&FitResult) -> Result<(), AppError>,
{
    let negative_control = match negative_control {
        Some(label) => {
            let group = groups
                .iter()
                .find(|g| g.label == label)
                .ok_or_else(|| AppError::new(EXIT_INPUT, format!("Negative-control group '{label}' not found.")))?;
            Some(fit_negative_control(concentrations, group, config)?)
        }
        None => None,
    };
    let model = match &negative_control {
        Some(nc) => BindingModel::WithBackground(nc.curve),
        None => BindingModel::Hyperbola,
    };

    let driver = KdDriver::new(concentrations, model, config)?;
    let mut results = Vec::new();
    let mut sink_error = None;
    let summary = driver.run(groups, |r| match on_result(&r) {
        Ok(()) => {
            results.push(r);
            ControlFlow::Continue(())
        }
        Err(e) => {
            sink_error = Some(e);
            ControlFlow::Break(())
        }
    })?;
    if let Some(e) = sink_error {
        return Err(e);
    }

    Ok(GroupFits {
        model,
        negative_control,
        results,
        summary,
    })
}

/// Fit the negative control with the baseline model; it must succeed.
pub fn fit_negative_control(
    concentrations: &ConcentrationSeries,
    group: &FittingGroup,
    config: &KdConfig,
) -> Result<NegativeControlSummary, AppError> {
    let driver = KdDriver::new(concentrations, BindingModel::Hyperbola, config)?;
    match driver.fit_group(group)? {
        GroupOutcome::Emitted { result, .. } => {
            info!(
                label = %result.label,
                kd = result.kd,
                kd_uncertainty = result.kd_uncertainty,
                delta_y = result.delta_y,
                offset = result.offset,
                "negative control fit"
            );
            Ok(NegativeControlSummary {
                curve: BackgroundCurve {
                    delta_y: result.delta_y,
                    kd: result.kd,
                    offset: result.offset,
                },
                kd_uncertainty: result.kd_uncertainty,
                label: result.label,
            })
        }
        GroupOutcome::Dropped { label, reason } => {
            let exit_code = match reason {
                DropReason::FitFailed(FitFailure::NonConvergence { .. } | FitFailure::NumericalOverflow) => {
                    EXIT_NUMERICAL
                }
                _ => EXIT_INSUFFICIENT,
            };
            Err(AppError::new(
                exit_code,
                format!("Negative-control group '{label}' could not be fit: {reason}."),
            ))
        }
    }
}
