//! Orifice-equation leak discharge.
//!
//! Recomputes the expected leak flow from first principles. Used both to fill
//! in leak-flow values the engine does not report and as a physical sanity
//! check against the values it does.

/// Standard gravity, m/s².
pub const GRAVITY_M_S2: f64 = 9.81;

/// `Q = Cd · A · sqrt(2 · g · h)` in m³/s, where `h` is the gauge pressure at
/// the leak node in meters. Zero whenever the gauge pressure is non-positive.
pub fn leak_flow(pressure_m: f64, area_m2: f64, discharge_coeff: f64) -> f64 {
    if pressure_m <= 0.0 {
        return 0.0;
    }
    discharge_coeff * area_m2 * (2.0 * GRAVITY_M_S2 * pressure_m).sqrt()
}
