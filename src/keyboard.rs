//! The 32-key set: routes samples to key switches, reconciles each key's
//! state-machine variant against the configuration, and emits one round of
//! HID or MIDI output.

use crate::backend::EventSink;
use crate::config::{Config, KeyType, Mode};
use crate::key_switch::{KeyClass, KeySwitch};
use crate::report::{midi, KeyboardReport};
use crate::NUM_KEYS;

/// Key index for each (adc channel, mux channel) pair, fixed by the board
/// routing.
#[rustfmt::skip]
const KEY_INDEX: [[u8; 8]; 4] = [
    [31, 30, 29, 28, 26, 25, 24, 27],
    [23, 22, 21, 16, 19, 18, 20, 17],
    [15, 14,  8,  9, 11, 12, 13, 10],
    [ 7,  0,  1,  2,  6,  5,  4,  3],
];

/// Effective state-machine variant for a key under the given global mode.
fn effective_class(mode: Mode, key_type: KeyType) -> KeyClass {
    match mode {
        Mode::Disabled => KeyClass::Disabled,
        Mode::Calibrate => KeyClass::Calibrating,
        Mode::Keyboard => match key_type {
            KeyType::Disabled => KeyClass::Disabled,
            KeyType::Calibrate => KeyClass::Calibrating,
            KeyType::Threshold => KeyClass::Threshold,
            KeyType::RapidTrigger => KeyClass::RapidTrigger,
        },
        Mode::Midi => match key_type {
            KeyType::Disabled => KeyClass::Disabled,
            _ => KeyClass::Threshold,
        },
    }
}

pub struct Keyboard {
    keys: [KeySwitch; NUM_KEYS],
    was_pressed: [bool; NUM_KEYS],
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyboard {
    pub fn new() -> Self {
        Self { keys: [KeySwitch::default(); NUM_KEYS], was_pressed: [false; NUM_KEYS] }
    }

    /// Feed one fresh ADC sample into the key wired to this (adc, mux)
    /// position. Pairs outside the routing table are dropped.
    pub fn feed_sample(&mut self, config: &mut Config, adc_channel: u8, mux_channel: u8, value: u16) {
        let Some(&index) = KEY_INDEX
            .get(adc_channel as usize)
            .and_then(|row| row.get(mux_channel as usize))
        else {
            return;
        };
        let index = index as usize;
        self.keys[index].update(value, &config.key_switches[index], &mut config.calibration[index]);
    }

    /// Align every key's variant with `(mode, key_type)`, replacing only
    /// the keys whose required variant changed. Runs at round boundaries,
    /// never mid-sample, so configuration writes land between rounds.
    pub fn reconcile(&mut self, config: &mut Config) {
        for (index, key) in self.keys.iter_mut().enumerate() {
            let target = effective_class(config.mode, config.key_switches[index].key_type);
            key.reconcile(target, &mut config.calibration[index]);
        }
    }

    /// Emit the output for a completed scan round: exactly one boot report
    /// in Keyboard mode, note events per pressed-edge in MIDI mode, nothing
    /// otherwise.
    pub fn dispatch<S: EventSink>(&mut self, config: &mut Config, sink: &mut S) {
        self.reconcile(config);
        match config.mode {
            Mode::Keyboard => self.dispatch_keyboard(config, sink),
            Mode::Midi => self.dispatch_midi(config, sink),
            Mode::Disabled | Mode::Calibrate => {}
        }
    }

    fn dispatch_keyboard<S: EventSink>(&mut self, config: &Config, sink: &mut S) {
        let mut report = KeyboardReport::new();
        for (index, key) in self.keys.iter().enumerate() {
            if key.is_pressed() {
                report.press(config.key_switches[index].key_code);
            }
        }
        sink.hid_keyboard_report(report.modifier, &report.key_codes);
    }

    fn dispatch_midi<S: EventSink>(&mut self, config: &Config, sink: &mut S) {
        for (index, key) in self.keys.iter().enumerate() {
            let pressed = key.is_pressed();
            let note = config.midi[index].note_number;
            if pressed && !self.was_pressed[index] {
                sink.midi_write(midi::note_on(note, midi_velocity(key.velocity())));
            } else if !pressed && self.was_pressed[index] {
                sink.midi_write(midi::note_off(note));
            }
            self.was_pressed[index] = pressed;
        }
    }

    /// Travel depth of a key in whole 0.1 mm steps, for the live-position
    /// window of the configurator.
    pub fn position(&self, index: usize) -> u8 {
        self.keys[index].position() as u8
    }

    #[cfg(test)]
    pub(crate) fn key(&self, index: usize) -> &KeySwitch {
        &self.keys[index]
    }
}

/// MIDI strike velocity from the filtered key speed, clamped to 7 bits.
fn midi_velocity(velocity_mm_s: f32) -> u8 {
    let magnitude = libm::roundf(libm::fabsf(velocity_mm_s));
    if magnitude > 127.0 {
        127
    } else {
        magnitude as u8
    }
}
