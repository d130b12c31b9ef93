//! Terminal reporting: run summary and tightest binders.
//!
//! Formatting lives here so the fitting code stays free of presentation.

use crate::app::pipeline::FitRun;
use crate::domain::FitResult;
use crate::io::EnergyUnits;
use crate::models::{binding_free_energy, delta_aba, saturating_concentration};

/// Fraction of clusters bound at the reported saturating concentration.
const SATURATION_FRACTION: f64 = 0.95;

/// Format the run summary: inputs, negative control, and group tallies.
pub fn format_run_summary(run: &FitRun) -> String {
    let mut out = String::new();
    let s = &run.fits.summary;

    out.push_str("=== champ - Kd fit ===\n");
    out.push_str(&format!("Concentrations: {}\n", fmt_vec(run.concentrations.as_slice())));
    out.push_str(&format!(
        "Clusters: {} rows read, {} skipped | reads matched {}/{}\n",
        run.rows_read,
        run.row_errors.len(),
        run.grouping.reads_matched,
        run.grouping.reads_listed,
    ));
    out.push_str(&format!("Model: {}\n", run.fits.model.display_name()));

    if let Some(nc) = &run.fits.negative_control {
        out.push_str(&format!(
            "Negative control '{}': Kd={} dy={:.3} c={:.3}\n",
            nc.label,
            fmt_kd(nc.curve.kd, nc.kd_uncertainty),
            nc.curve.delta_y,
            nc.curve.offset,
        ));
        out.push_str(&format!(
            "  {:.0}% saturation at {:.3}\n",
            SATURATION_FRACTION * 100.0,
            saturating_concentration(nc.curve.kd, SATURATION_FRACTION),
        ));
    }

    out.push_str(&format!("\nGroups fit: {} of {} attempted\n", s.fit, s.attempted));
    out.push_str(&format!("- dropped (too few clusters): {}\n", s.dropped_insufficient));
    out.push_str(&format!("- dropped (fit failed)      : {}\n", s.dropped_fit_failure));
    if s.bootstrap_exhausted > 0 {
        out.push_str(&format!("- no Kd uncertainty        : {}\n", s.bootstrap_exhausted));
    }
    if s.cancelled {
        out.push_str("- run cancelled before all groups completed\n");
    }

    out
}

/// The `top_n` results with the lowest Kd.
pub fn rank_by_affinity(results: &[FitResult], top_n: usize) -> Vec<&FitResult> {
    let mut sorted: Vec<&FitResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.kd.total_cmp(&b.kd).then_with(|| a.label.cmp(&b.label)));
    sorted.truncate(top_n);
    sorted
}

/// Format the tightest binders, with ΔG and (when a reference Kd is given) ΔABA.
pub fn format_top_binders(
    results: &[FitResult],
    top_n: usize,
    units: EnergyUnits,
    reference_kd: Option<f64>,
) -> String {
    let mut out = String::new();
    out.push_str("Tightest binders:\n");
    out.push_str(
        format!(
            "{:<24} {:>22} {:>10} {:>8} {:>8}\n",
            "label", "kd", "dG", "dABA", "clusters"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<24} {:-<22} {:-<10} {:-<8} {:-<8}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in rank_by_affinity(results, top_n) {
        let dg = binding_free_energy(r.kd, units.molar_scale, units.temperature_k)
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let aba = reference_kd
            .filter(|k| *k > 0.0 && r.kd > 0.0)
            .map(|k| format!("{:.2}", delta_aba(r.kd, k)))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{:<24} {:>22} {:>10} {:>8} {:>8}\n",
                truncate(&r.label, 24),
                fmt_kd(r.kd, r.kd_uncertainty),
                dg,
                aba,
                r.clusters,
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn fmt_kd(kd: f64, uncertainty: Option<f64>) -> String {
    match uncertainty {
        Some(sd) => format!("{kd:.3} ± {sd:.3}"),
        None => format!("{kd:.3} ± n/a"),
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::GroupFits;
    use crate::domain::{BackgroundCurve, ConcentrationSeries};
    use crate::fit::DriverSummary;
    use crate::io::{GroupingStats, NegativeControlSummary};
    use crate::models::{BindingModel, NANOMOLAR, ROOM_TEMPERATURE_K};

    const UNITS: EnergyUnits = EnergyUnits {
        molar_scale: NANOMOLAR,
        temperature_k: ROOM_TEMPERATURE_K,
    };

    fn result(label: &str, kd: f64) -> FitResult {
        FitResult {
            label: label.to_string(),
            kd,
            kd_uncertainty: Some(0.5),
            delta_y: 10.0,
            offset: 1.0,
            fractional_contribution: None,
            clusters: 9,
            observations: 70,
        }
    }

    #[test]
    fn ranking_puts_lowest_kd_first() {
        let results = vec![result("B", 50.0), result("A", 2.0), result("C", 2.0), result("D", 900.0)];
        let top = rank_by_affinity(&results, 3);
        let labels: Vec<&str> = top.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "C", "B"]);
    }

    #[test]
    fn top_binders_table_lists_energetics() {
        let text = format_top_binders(&[result("ACGT", 1.0)], 5, UNITS, Some(1.0));
        let row = text.lines().nth(3).unwrap();
        assert!(row.starts_with("ACGT"));
        assert!(row.contains("1.000 ± 0.500"));
        assert!(row.contains("-12.28"));
        assert!(row.contains("0.00"));
    }

    #[test]
    fn summary_reports_fit_versus_attempted() {
        let run = FitRun {
            concentrations: ConcentrationSeries::new(vec![1.0, 10.0, 100.0]).unwrap(),
            grouping: GroupingStats::default(),
            rows_read: 30,
            row_errors: Vec::new(),
            fits: GroupFits {
                model: BindingModel::Hyperbola,
                negative_control: Some(NegativeControlSummary {
                    label: "NC".to_string(),
                    curve: BackgroundCurve {
                        delta_y: 5.0,
                        kd: 10.0,
                        offset: 1.0,
                    },
                    kd_uncertainty: None,
                }),
                results: Vec::new(),
                summary: DriverSummary {
                    attempted: 4,
                    fit: 3,
                    dropped_fit_failure: 1,
                    ..DriverSummary::default()
                },
            },
        };
        let text = format_run_summary(&run);
        assert!(text.contains("Groups fit: 3 of 4 attempted"));
        assert!(text.contains("Kd=10.000 ± n/a"));
        assert!(text.contains("95% saturation at 190.000"));
    }
}
