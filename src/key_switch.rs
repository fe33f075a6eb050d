//! Per-key signal processing: kinematics plus the tagged state-machine
//! variants that turn travel into press/release decisions.

use crate::config::{KeySwitchCalibration, KeySwitchConfig};
use crate::sensor;

/// Scan period of the 250 Hz scheduler, in seconds.
pub const SAMPLING_INTERVAL: f32 = 0.004;

/// Time constant of the velocity low-pass filter, in seconds.
pub const VELOCITY_TIME_CONSTANT: f32 = 0.01;

/// Filtered kinematic state shared by every variant.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct KeyRuntime {
    /// Depth in 0.1 mm, clamped to the stroke by the sensor model.
    pub position: f32,
    /// Low-passed speed in mm/s; positive while pressing deeper.
    pub velocity: f32,
    pub is_pressed: bool,
}

/// The four behaviors a key can be reconciled into.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyClass {
    Disabled,
    Calibrating,
    Threshold,
    RapidTrigger,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RapidTriggerPhase {
    Rest,
    Down,
    Up,
}

/// Variant-local state. Replaced wholesale when reconciliation switches a
/// key to a different class.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Behavior {
    Disabled,
    Calibrating,
    Threshold,
    RapidTrigger { phase: RapidTriggerPhase, peak_position: f32 },
}

impl Behavior {
    fn with_class(class: KeyClass) -> Self {
        match class {
            KeyClass::Disabled => Behavior::Disabled,
            KeyClass::Calibrating => Behavior::Calibrating,
            KeyClass::Threshold => Behavior::Threshold,
            KeyClass::RapidTrigger => {
                Behavior::RapidTrigger { phase: RapidTriggerPhase::Rest, peak_position: 0.0 }
            }
        }
    }

    fn class(&self) -> KeyClass {
        match self {
            Behavior::Disabled => KeyClass::Disabled,
            Behavior::Calibrating => KeyClass::Calibrating,
            Behavior::Threshold => KeyClass::Threshold,
            Behavior::RapidTrigger { .. } => KeyClass::RapidTrigger,
        }
    }
}

/// One key: kinematics plus its current behavior variant.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct KeySwitch {
    runtime: KeyRuntime,
    behavior: Behavior,
}

impl Default for KeySwitch {
    fn default() -> Self {
        Self::with_class(KeyClass::Disabled)
    }
}

impl KeySwitch {
    pub fn with_class(class: KeyClass) -> Self {
        Self { runtime: KeyRuntime::default(), behavior: Behavior::with_class(class) }
    }

    pub fn class(&self) -> KeyClass {
        self.behavior.class()
    }

    pub fn is_pressed(&self) -> bool {
        self.runtime.is_pressed
    }

    pub fn position(&self) -> f32 {
        self.runtime.position
    }

    pub fn velocity(&self) -> f32 {
        self.runtime.velocity
    }

    /// Swap this key to `target`, discarding variant-local state, when its
    /// current class differs. Entering calibration winds up the envelope so
    /// the following samples re-seed it.
    pub fn reconcile(&mut self, target: KeyClass, cal: &mut KeySwitchCalibration) {
        if self.class() == target {
            return;
        }
        *self = Self::with_class(target);
        if target == KeyClass::Calibrating {
            cal.reset_for_calibration();
        }
    }

    /// Consume one ADC sample; returns the resulting pressed state.
    pub fn update(
        &mut self,
        value: u16,
        config: &KeySwitchConfig,
        cal: &mut KeySwitchCalibration,
    ) -> bool {
        match &mut self.behavior {
            Behavior::Disabled => {
                self.runtime.is_pressed = false;
            }
            Behavior::Calibrating => {
                cal.max_value = cal.max_value.max(value);
                cal.min_value = cal.min_value.min(value);
                self.runtime.is_pressed = false;
            }
            Behavior::Threshold => {
                self.runtime.integrate(value, cal);
                self.runtime.is_pressed = threshold_pressed(self.runtime.position, config);
            }
            Behavior::RapidTrigger { phase, peak_position } => {
                self.runtime.integrate(value, cal);
                self.runtime.is_pressed = rapid_trigger_step(
                    phase,
                    peak_position,
                    self.runtime.is_pressed,
                    self.runtime.position,
                    config,
                );
            }
        }
        self.runtime.is_pressed
    }
}

impl KeyRuntime {
    /// Fold a new sample into position and low-passed velocity.
    fn integrate(&mut self, value: u16, cal: &KeySwitchCalibration) {
        let position = sensor::adc_to_distance(value, cal);
        // 0.1 mm per tick -> mm/s
        let raw_velocity = (position - self.position) / SAMPLING_INTERVAL / 10.0;
        let alpha = VELOCITY_TIME_CONSTANT / (VELOCITY_TIME_CONSTANT + SAMPLING_INTERVAL);
        self.velocity = alpha * self.velocity + (1.0 - alpha) * raw_velocity;
        self.position = position;
    }
}

/// Static threshold: pressed strictly past the actuation point, no
/// hysteresis. Edges fall out of `was_pressed` at dispatch time.
fn threshold_pressed(position: f32, config: &KeySwitchConfig) -> bool {
    position > f32::from(config.actuation_point)
}

/// One rapid-trigger transition.
///
/// `peak_position` tracks the deepest point of the current press run while
/// Down, and the shallowest point while Up; a reversal larger than the
/// matching sensitivity flips the phase without waiting for the key to
/// clear the actuation point.
fn rapid_trigger_step(
    phase: &mut RapidTriggerPhase,
    peak_position: &mut f32,
    was_pressed: bool,
    position: f32,
    config: &KeySwitchConfig,
) -> bool {
    let actuation_point = f32::from(config.actuation_point);
    match *phase {
        RapidTriggerPhase::Rest => {
            if position > actuation_point {
                *phase = RapidTriggerPhase::Down;
                *peak_position = position;
                return true;
            }
        }
        RapidTriggerPhase::Down => {
            if position <= actuation_point {
                *phase = RapidTriggerPhase::Rest;
                return false;
            }
            if *peak_position - position > f32::from(config.rapid_up_sensitivity) {
                *peak_position = position;
                *phase = RapidTriggerPhase::Up;
                return false;
            }
            if position > *peak_position {
                *peak_position = position;
            }
        }
        RapidTriggerPhase::Up => {
            if position <= actuation_point {
                *phase = RapidTriggerPhase::Rest;
                return false;
            }
            if position - *peak_position > f32::from(config.rapid_down_sensitivity) {
                *peak_position = position;
                *phase = RapidTriggerPhase::Down;
                return true;
            }
            if position < *peak_position {
                *peak_position = position;
            }
        }
    }
    was_pressed
}
