//! Maps raw ADC counts to key travel.

use crate::config::KeySwitchCalibration;

/// Full key stroke in 0.1 mm units (~4 mm of travel).
pub const FULL_TRAVEL: f32 = 40.0;

/// Curve-fit constant of the sensor response, in ADC counts.
const CURVE_FIT_A: f32 = 200.0;

/// Travel distance in 0.1 mm for a 12-bit ADC reading under the given
/// calibration envelope.
///
/// The sensor output is a monotone-decreasing nonlinear function of depth;
/// a logarithmic fit linearises it, normalised so the calibrated envelope
/// spans exactly `0..=40`. Readings outside the envelope saturate: below
/// `min_value` is fully pressed, above `max_value` fully released. An
/// unseparated envelope (`min >= max`) means calibration has not run, and
/// every in-envelope reading counts as released.
pub fn adc_to_distance(value: u16, cal: &KeySwitchCalibration) -> f32 {
    if value < cal.min_value {
        return FULL_TRAVEL;
    }
    if value > cal.max_value {
        return 0.0;
    }
    if cal.min_value >= cal.max_value {
        return 0.0;
    }

    let span = f32::from(cal.max_value - cal.min_value);
    let b = libm::logf(span / CURVE_FIT_A + 1.0) / 4.0;
    let depth = f32::from(cal.max_value - value);
    libm::logf(depth / CURVE_FIT_A + 1.0) * 10.0 / b
}
