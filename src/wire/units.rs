//! Canonical unit conversions (spec §6, §9 open question #3).
//!
//! The baseline computed dBm↔watt conversions in several places with
//! inconsistent scaling (`/1000` vs `-30 dB` forms). Every conversion in this
//! crate is routed through the two functions below so there is exactly one
//! place that can get the scaling wrong.

/// Speed of light in meters/second, used as the propagation-delay floor.
pub const SPEED_OF_LIGHT_MPS: f64 = 299_792_458.0;

/// `P_w = 10^((P_dBm - 30) / 10)`
pub fn dbm_to_watts(dbm: f64) -> f64 {
    10f64.powf((dbm - 30.0) / 10.0)
}

/// Inverse of [`dbm_to_watts`].
pub fn watts_to_dbm(watts: f64) -> f64 {
    10.0 * watts.log10() + 30.0
}

/// Wire encoding for linear power: watts * 10^12, rounded to the nearest
/// integer picowatt, clamped to the representable `u64` range.
pub fn watts_to_picowatts(watts: f64) -> u64 {
    let pw = (watts * 1e12).round();
    if pw <= 0.0 {
        0
    } else if pw >= u64::MAX as f64 {
        u64::MAX
    } else {
        pw as u64
    }
}

pub fn picowatts_to_watts(pw: u64) -> f64 {
    pw as f64 / 1e12
}
