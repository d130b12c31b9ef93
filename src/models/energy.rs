//! Binding energetics derived from fitted Kds.

/// Gas constant in kcal/(mol·K).
pub const GAS_CONSTANT_KCAL: f64 = 1.987_204_258_640_83e-3;

/// Default temperature (25 °C) in kelvin.
pub const ROOM_TEMPERATURE_K: f64 = 298.15;

/// Molar scale of a nanomolar Kd.
pub const NANOMOLAR: f64 = 1e-9;

/// Binding free energy `ΔG = RT · ln(Kd)` in kcal/mol.
///
/// `molar_scale` converts the Kd's unit to molar (e.g. [`NANOMOLAR`]).
/// Non-positive Kds have no free energy and yield `None`.
pub fn binding_free_energy(kd: f64, molar_scale: f64, temperature_k: f64) -> Option<f64> {
    let molar = kd * molar_scale;
    if !(molar.is_finite() && molar > 0.0) {
        return None;
    }
    Some(GAS_CONSTANT_KCAL * temperature_k * molar.ln())
}

/// Apparent binding affinity change relative to a reference, `ln(Kd / Kd_ref)` (units of kT).
pub fn delta_aba(kd: f64, reference_kd: f64) -> f64 {
    (kd / reference_kd).ln()
}

/// Concentration at which `fraction` of clusters are bound: `Kd · f / (1 - f)`.
pub fn saturating_concentration(kd: f64, fraction: f64) -> f64 {
    kd * fraction / (1.0 - fraction)
}
