//! Tab-separated ingest of cluster intensities and read-name groups.
//!
//! Two inputs are joined into fitting groups:
//!
//! - an intensity table: header `read_name<TAB>c1<TAB>c2…` (the concentrations),
//!   then one row per cluster
//! - a read-name table (no header): `label<TAB>read1<TAB>read2…`
//!
//! Malformed rows are skipped and reported; a malformed header is fatal.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{ConcentrationSeries, FittingGroup, IntensityGradient};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Intensity curves keyed by read name.
#[derive(Debug, Clone)]
pub struct IntensityTable {
    pub concentrations: ConcentrationSeries,
    pub gradients: HashMap<String, IntensityGradient>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Counts from joining read names against intensities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingStats {
    pub labels_read: usize,
    pub groups: usize,
    pub reads_listed: usize,
    pub reads_matched: usize,
}

fn tsv_reader(file: File, has_headers: bool) -> csv::Reader<File> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file)
}

fn open(path: &Path, what: &str) -> Result<File, AppError> {
    File::open(path).map_err(|e| AppError::new(2, format!("Failed to open {what} '{}': {e}", path.display())))
}

/// Load the intensity table.
pub fn load_intensity_table(path: &Path) -> Result<IntensityTable, AppError> {
    let mut reader = tsv_reader(open(path, "intensity table")?, true);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read intensity table header: {e}")))?
        .clone();
    let concentrations = parse_concentration_header(&headers)?;
    let width = concentrations.len();

    let mut gradients = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("TSV parse error: {e}"),
                });
                continue;
            }
        };

        let Some(name) = record.get(0).filter(|s| !s.is_empty()) else {
            row_errors.push(RowError {
                line,
                id: None,
                message: "missing read name".to_string(),
            });
            continue;
        };

        match parse_gradient(&record, width) {
            Ok(gradient) => {
                if gradients.insert(name.to_string(), gradient).is_some() {
                    row_errors.push(RowError {
                        line,
                        id: Some(name.to_string()),
                        message: "duplicate read name; keeping the later row".to_string(),
                    });
                }
            }
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(name.to_string()),
                message,
            }),
        }
    }

    if gradients.is_empty() {
        return Err(AppError::new(3, "No valid intensity rows were read."));
    }

    Ok(IntensityTable {
        concentrations,
        gradients,
        row_errors,
        rows_read,
    })
}

/// Load `label -> read names`, in file order.
pub fn load_read_names(path: &Path) -> Result<Vec<(String, Vec<String>)>, AppError> {
    let mut reader = tsv_reader(open(path, "read-name table")?, false);
    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| AppError::new(2, format!("Failed to parse read-name table line {}: {e}", idx + 1)))?;
        let mut fields = record.iter();
        let Some(label) = fields.next().filter(|s| !s.is_empty()) else {
            continue;
        };
        let reads: Vec<String> = fields.filter(|s| !s.is_empty()).map(str::to_string).collect();
        out.push((label.to_string(), reads));
    }
    Ok(out)
}

/// Join read names with intensity curves.
///
/// Read names without an intensity curve are skipped. Labels with no matched
/// read are not turned into groups. With `normalization = Some((imin, imax))`
/// every gradient is rescaled to `(v - imin) / (imax - imin)`.
pub fn build_groups(
    read_names: &[(String, Vec<String>)],
    intensities: &IntensityTable,
    normalization: Option<(f64, f64)>,
) -> (Vec<FittingGroup>, GroupingStats) {
    let mut stats = GroupingStats {
        labels_read: read_names.len(),
        ..GroupingStats::default()
    };
    let mut groups = Vec::new();

    for (label, reads) in read_names {
        stats.reads_listed += reads.len();
        let gradients: Vec<IntensityGradient> = reads
            .iter()
            .filter_map(|read| intensities.gradients.get(read))
            .map(|g| match normalization {
                Some((imin, imax)) => g.normalized(imin, imax),
                None => g.clone(),
            })
            .collect();
        stats.reads_matched += gradients.len();
        if !gradients.is_empty() {
            groups.push(FittingGroup::new(label.clone(), gradients));
        }
    }
    stats.groups = groups.len();
    (groups, stats)
}

fn parse_concentration_header(headers: &StringRecord) -> Result<ConcentrationSeries, AppError> {
    let values = headers
        .iter()
        .skip(1)
        .map(|h| {
            let h = h.trim().trim_start_matches('\u{feff}');
            h.parse::<f64>()
                .map_err(|_| AppError::new(2, format!("Invalid concentration in header: '{h}'")))
        })
        .collect::<Result<Vec<f64>, AppError>>()?;
    if values.is_empty() {
        return Err(AppError::new(
            2,
            "Intensity table header must list at least one concentration after the read-name column.",
        ));
    }
    ConcentrationSeries::new(values)
}

fn parse_gradient(record: &StringRecord, width: usize) -> Result<IntensityGradient, String> {
    let fields = record.len().saturating_sub(1);
    if fields != width {
        return Err(format!("expected {width} intensities, found {fields}"));
    }
    record
        .iter()
        .skip(1)
        .map(parse_intensity)
        .collect::<Result<Vec<Option<f64>>, String>>()
        .map(IntensityGradient::new)
}

/// Parse one intensity cell; empty, `nan`, `NA`, and `-` mean "not observed".
pub fn parse_intensity(field: &str) -> Result<Option<f64>, String> {
    let s = field.trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let v: f64 = s.parse().map_err(|_| format!("invalid intensity '{s}'"))?;
    if !v.is_finite() {
        return Err(format!("non-finite intensity '{s}'"));
    }
    Ok(Some(v))
}
