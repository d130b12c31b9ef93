//! Export per-group Kd results and the run summary.
//!
//! The Kd table is tab-separated so it drops straight into spreadsheets and
//! genome-track tooling. Missing values are written as empty fields.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::SimulatedTruth;
use crate::domain::{BackgroundCurve, ConcentrationSeries, FitResult, IntensityGradient, KdConfig};
use crate::error::AppError;
use crate::fit::DriverSummary;
use crate::models::{BindingModel, binding_free_energy};

/// Unit and temperature used to convert Kds into free energies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyUnits {
    /// Factor converting a Kd into molar.
    pub molar_scale: f64,
    pub temperature_k: f64,
}

const KD_TABLE_COLUMNS: [&str; 9] = [
    "label",
    "kd",
    "kd_uncertainty",
    "delta_y",
    "offset",
    "fractional_contribution",
    "clusters",
    "observations",
    "delta_g_kcal_mol",
];

#[derive(Debug, Serialize)]
struct KdRow<'a> {
    label: &'a str,
    kd: f64,
    kd_uncertainty: Option<f64>,
    delta_y: f64,
    offset: f64,
    fractional_contribution: Option<f64>,
    clusters: usize,
    observations: usize,
    delta_g_kcal_mol: Option<f64>,
}

/// Streams Kd rows to a TSV file as results arrive.
pub struct KdTableWriter {
    writer: csv::Writer<File>,
    units: EnergyUnits,
    rows: usize,
}

impl KdTableWriter {
    pub fn create(path: &Path, units: EnergyUnits) -> Result<Self, AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::new(2, format!("Failed to create Kd table '{}': {e}", path.display())))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);
        // Written explicitly so an empty run still produces a header.
        writer
            .write_record(KD_TABLE_COLUMNS)
            .map_err(|e| AppError::new(2, format!("Failed to write Kd table header: {e}")))?;
        Ok(Self {
            writer,
            units,
            rows: 0,
        })
    }

    pub fn write(&mut self, r: &FitResult) -> Result<(), AppError> {
        self.writer
            .serialize(KdRow {
                label: &r.label,
                kd: r.kd,
                kd_uncertainty: r.kd_uncertainty,
                delta_y: r.delta_y,
                offset: r.offset,
                fractional_contribution: r.fractional_contribution,
                clusters: r.clusters,
                observations: r.observations,
                delta_g_kcal_mol: binding_free_energy(r.kd, self.units.molar_scale, self.units.temperature_k),
            })
            .map_err(|e| AppError::new(2, format!("Failed to write Kd table row: {e}")))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<usize, AppError> {
        self.writer
            .flush()
            .map_err(|e| AppError::new(2, format!("Failed to flush Kd table: {e}")))?;
        Ok(self.rows)
    }
}

/// Write an intensity table that `load_intensity_table` reads back.
///
/// Missing observations are written as `NA`.
pub fn write_intensity_table(
    path: &Path,
    concentrations: &ConcentrationSeries,
    rows: &[(String, &IntensityGradient)],
) -> Result<(), AppError> {
    let mut writer = tsv_writer(path, "intensity table")?;
    let header = std::iter::once("read_name".to_string()).chain(concentrations.as_slice().iter().map(|c| c.to_string()));
    writer
        .write_record(header)
        .map_err(|e| AppError::new(2, format!("Failed to write intensity table header: {e}")))?;
    for (name, gradient) in rows {
        let cells = std::iter::once(name.clone()).chain(
            gradient
                .values()
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_else(|| "NA".to_string())),
        );
        writer
            .write_record(cells)
            .map_err(|e| AppError::new(2, format!("Failed to write intensity row '{name}': {e}")))?;
    }
    flush(writer, "intensity table")
}

/// Write `label<TAB>read…` lines.
pub fn write_read_names(path: &Path, read_names: &[(String, Vec<String>)]) -> Result<(), AppError> {
    let mut writer = tsv_writer(path, "read-name table")?;
    for (label, reads) in read_names {
        writer
            .write_record(std::iter::once(label).chain(reads))
            .map_err(|e| AppError::new(2, format!("Failed to write read names for '{label}': {e}")))?;
    }
    flush(writer, "read-name table")
}

#[derive(Debug, Serialize)]
struct TruthRow<'a> {
    label: &'a str,
    kd: f64,
    delta_y: f64,
    offset: f64,
    clusters: usize,
}

/// Write the ground truth of a simulated experiment.
pub fn write_truth_table(path: &Path, truth: &[SimulatedTruth]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create truth table '{}': {e}", path.display())))?;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(file);
    for t in truth {
        writer
            .serialize(TruthRow {
                label: &t.label,
                kd: t.kd,
                delta_y: t.delta_y,
                offset: t.offset,
                clusters: t.clusters,
            })
            .map_err(|e| AppError::new(2, format!("Failed to write truth row: {e}")))?;
    }
    flush(writer, "truth table")
}

fn tsv_writer(path: &Path, what: &str) -> Result<csv::Writer<File>, AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display())))?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_writer(file))
}

fn flush(mut writer: csv::Writer<File>, what: &str) -> Result<(), AppError> {
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush {what}: {e}")))
}

/// The negative-control fit that seeded the background model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegativeControlSummary {
    pub label: String,
    pub curve: BackgroundCurve,
    pub kd_uncertainty: Option<f64>,
}

/// Machine-readable record of one `champ fit` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub model: BindingModel,
    pub negative_control: Option<NegativeControlSummary>,
    pub driver: DriverSummary,
    pub config: KdConfig,
    pub energy_units: EnergyUnits,
}

/// Write the run summary as pretty JSON.
pub fn write_run_summary_json(path: &Path, summary: &RunSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::new(2, format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NANOMOLAR, ROOM_TEMPERATURE_K};

    const UNITS: EnergyUnits = EnergyUnits {
        molar_scale: NANOMOLAR,
        temperature_k: ROOM_TEMPERATURE_K,
    };

    fn result(label: &str, kd_uncertainty: Option<f64>) -> FitResult {
        FitResult {
            label: label.to_string(),
            kd: 1.0,
            kd_uncertainty,
            delta_y: 100.0,
            offset: 2.5,
            fractional_contribution: None,
            clusters: 12,
            observations: 120,
        }
    }

    fn write_rows(path: &Path, rows: &[FitResult]) -> usize {
        let mut writer = KdTableWriter::create(path, UNITS).unwrap();
        for r in rows {
            writer.write(r).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn kd_table_has_header_and_empty_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kd.tsv");
        assert_eq!(write_rows(&path, &[result("ACGT", Some(0.25)), result("TTTT", None)]), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "label\tkd\tkd_uncertainty\tdelta_y\toffset\tfractional_contribution\tclusters\tobservations\tdelta_g_kcal_mol"
        );
        let first: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(first[0], "ACGT");
        assert_eq!(first[2], "0.25");
        assert_eq!(first[5], "");
        let dg: f64 = first[8].parse().unwrap();
        assert!((dg + 12.278).abs() < 1e-3);
        let second: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(second[2], "");
    }

    #[test]
    fn empty_run_still_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kd.tsv");
        assert_eq!(write_rows(&path, &[]), 0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("label\tkd\t"));
    }

    #[test]
    fn streamed_rows_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kd.tsv");
        let mut writer = KdTableWriter::create(&path, UNITS).unwrap();
        writer.write(&result("A", Some(0.0))).unwrap();
        writer.write(&result("B", Some(0.0))).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn intensity_tables_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let intensities = dir.path().join("intensities.tsv");
        let names = dir.path().join("read_names.tsv");
        let cs = ConcentrationSeries::new(vec![0.5, 2.0, 8.0]).unwrap();
        let a = IntensityGradient::new(vec![Some(1.25), None, Some(3.0)]);
        let b = IntensityGradient::observed(&[2.0, 4.0, 6.0]);
        write_intensity_table(&intensities, &cs, &[("r1".to_string(), &a), ("r2".to_string(), &b)]).unwrap();
        write_read_names(&names, &[("SEQ".to_string(), vec!["r1".to_string(), "r2".to_string()])]).unwrap();

        let table = crate::io::load_intensity_table(&intensities).unwrap();
        assert_eq!(table.concentrations, cs);
        assert_eq!(table.gradients["r1"], a);
        assert_eq!(table.gradients["r2"], b);
        let read_names = crate::io::load_read_names(&names).unwrap();
        assert_eq!(read_names, vec![("SEQ".to_string(), vec!["r1".to_string(), "r2".to_string()])]);
    }

    #[test]
    fn run_summary_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary {
            tool: "champ".to_string(),
            generated_at: Utc::now(),
            model: BindingModel::Hyperbola,
            negative_control: None,
            driver: DriverSummary {
                attempted: 3,
                fit: 2,
                dropped_insufficient: 1,
                ..DriverSummary::default()
            },
            config: KdConfig::default(),
            energy_units: UNITS,
        };
        write_run_summary_json(&path, &summary).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["driver"]["fit"], 2);
        assert_eq!(v["model"]["kind"], "hyperbola");
        assert_eq!(v["config"]["minimum_required_counts"], 6);
    }
}
