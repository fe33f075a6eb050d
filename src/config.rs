//! Configuration model: the packed 324-byte image that the configurator
//! exposes as a flat address space and that flash persists verbatim.

use crate::key_codes::KeyCode;
use crate::NUM_KEYS;

/// Highest count a 12-bit ADC can report.
pub const ADC_MAX: u16 = 4095;

/// How a key switch turns travel into press events.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum KeyType {
    Disabled = 0,
    Calibrate = 1,
    #[default]
    Threshold = 2,
    RapidTrigger = 3,
}

impl KeyType {
    /// Total decoding; unknown bytes disable the key rather than guessing.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => KeyType::Calibrate,
            2 => KeyType::Threshold,
            3 => KeyType::RapidTrigger,
            _ => KeyType::Disabled,
        }
    }
}

/// Global operating mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    Disabled = 0,
    Calibrate = 1,
    #[default]
    Keyboard = 2,
    Midi = 3,
}

impl Mode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Mode::Calibrate,
            2 => Mode::Keyboard,
            3 => Mode::Midi,
            _ => Mode::Disabled,
        }
    }
}

/// Per-key switch settings, 5 bytes packed.
///
/// Travel quantities (`actuation_point`, the two sensitivities) are in
/// 0.1 mm units over the ~4 mm stroke.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeySwitchConfig {
    /// HID usage ID emitted in Keyboard mode.
    pub key_code: u8,
    pub key_type: KeyType,
    pub actuation_point: u8,
    /// Pull-back from the deepest point that releases a rapid trigger.
    pub rapid_up_sensitivity: u8,
    /// Push-down from the shallowest point that re-fires a rapid trigger.
    pub rapid_down_sensitivity: u8,
}

impl KeySwitchConfig {
    pub const PACKED_LEN: usize = 5;

    pub const fn with_key_code(key_code: u8) -> Self {
        Self {
            key_code,
            key_type: KeyType::Threshold,
            actuation_point: 10,
            rapid_up_sensitivity: 2,
            rapid_down_sensitivity: 2,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::PACKED_LEN] {
        [
            self.key_code,
            self.key_type as u8,
            self.actuation_point,
            self.rapid_up_sensitivity,
            self.rapid_down_sensitivity,
        ]
    }

    pub fn from_bytes(bytes: &[u8; Self::PACKED_LEN]) -> Self {
        Self {
            key_code: bytes[0],
            key_type: KeyType::from_byte(bytes[1]),
            actuation_point: bytes[2],
            rapid_up_sensitivity: bytes[3],
            rapid_down_sensitivity: bytes[4],
        }
    }
}

impl Default for KeySwitchConfig {
    fn default() -> Self {
        Self::with_key_code(KeyCode::Empty as u8)
    }
}

/// Per-key raw-ADC envelope learned during calibration, 4 bytes packed
/// (min half-word, then max, little-endian).
///
/// The sensor is inverted: a deeper press reads a lower count, so
/// `min_value` is the fully-pressed end of the envelope.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeySwitchCalibration {
    pub min_value: u16,
    pub max_value: u16,
}

impl KeySwitchCalibration {
    pub const PACKED_LEN: usize = 4;

    /// Widen the envelope to a wind-up state so the next samples re-seed
    /// both ends. Done whenever a key enters calibration.
    pub fn reset_for_calibration(&mut self) {
        self.min_value = ADC_MAX;
        self.max_value = 0;
    }

    pub fn to_bytes(&self) -> [u8; Self::PACKED_LEN] {
        let min = self.min_value.to_le_bytes();
        let max = self.max_value.to_le_bytes();
        [min[0], min[1], max[0], max[1]]
    }

    pub fn from_bytes(bytes: &[u8; Self::PACKED_LEN]) -> Self {
        Self {
            min_value: u16::from_le_bytes([bytes[0], bytes[1]]),
            max_value: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

impl Default for KeySwitchCalibration {
    fn default() -> Self {
        Self { min_value: 1000, max_value: 2048 }
    }
}

/// Per-key MIDI settings, 1 byte packed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiConfig {
    /// MIDI note number (0..=127).
    pub note_number: u8,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self { note_number: 60 }
    }
}

/// Byte offsets of the regions inside the packed [`Config`] image.
pub mod layout {
    use super::*;

    pub const KEY_SWITCHES: usize = 0;
    pub const KEY_SWITCHES_LEN: usize = NUM_KEYS * KeySwitchConfig::PACKED_LEN;
    pub const CALIBRATION: usize = KEY_SWITCHES + KEY_SWITCHES_LEN;
    pub const CALIBRATION_LEN: usize = NUM_KEYS * KeySwitchCalibration::PACKED_LEN;
    pub const MIDI: usize = CALIBRATION + CALIBRATION_LEN;
    pub const MIDI_LEN: usize = NUM_KEYS;
    pub const MODE: usize = MIDI + MIDI_LEN;
    pub const RESERVED_LEN: usize = 3;
    pub const TOTAL: usize = MODE + 1 + RESERVED_LEN;
}

/// The whole live configuration. Packs to exactly 324 bytes; the byte
/// layout is an external contract shared by the configurator address space
/// and the flash image.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Config {
    pub key_switches: [KeySwitchConfig; NUM_KEYS],
    pub calibration: [KeySwitchCalibration; NUM_KEYS],
    pub midi: [MidiConfig; NUM_KEYS],
    pub mode: Mode,
}

/// Built-in key map, row-major over the physical layout.
#[rustfmt::skip]
pub const DEFAULT_KEY_MAP: [KeyCode; NUM_KEYS] = [
    KeyCode::Escape, KeyCode::Num1,      KeyCode::Num2, KeyCode::Num3,    KeyCode::Num4, KeyCode::Num5, KeyCode::Num6,
    KeyCode::Num7,   KeyCode::Tab,       KeyCode::Q,    KeyCode::W,       KeyCode::E,    KeyCode::R,    KeyCode::T,
    KeyCode::Num8,   KeyCode::LeftShift, KeyCode::A,    KeyCode::S,       KeyCode::D,    KeyCode::F,    KeyCode::G,
    KeyCode::M,      KeyCode::LeftCtrl,  KeyCode::Z,    KeyCode::X,       KeyCode::C,    KeyCode::V,
    KeyCode::H,      KeyCode::N,         KeyCode::B,    KeyCode::LeftAlt, KeyCode::Space,
];

/// First note of the built-in MIDI map; key `i` plays `53 + i` (F3..C6).
const DEFAULT_MIDI_BASE_NOTE: u8 = 53;

impl Default for Config {
    fn default() -> Self {
        let mut key_switches = [KeySwitchConfig::default(); NUM_KEYS];
        let mut midi = [MidiConfig::default(); NUM_KEYS];
        for i in 0..NUM_KEYS {
            key_switches[i] = DEFAULT_KEY_MAP[i].default_switch();
            midi[i] = MidiConfig { note_number: DEFAULT_MIDI_BASE_NOTE + i as u8 };
        }
        Self {
            key_switches,
            calibration: [KeySwitchCalibration::default(); NUM_KEYS],
            midi,
            mode: Mode::default(),
        }
    }
}

impl Config {
    pub const PACKED_LEN: usize = layout::TOTAL;

    pub fn to_bytes(&self) -> [u8; Self::PACKED_LEN] {
        let mut bytes = [0u8; Self::PACKED_LEN];
        self.read_key_switch_bytes(0, &mut bytes[layout::KEY_SWITCHES..layout::CALIBRATION]);
        self.read_calibration_bytes(0, &mut bytes[layout::CALIBRATION..layout::MIDI]);
        self.read_midi_bytes(0, &mut bytes[layout::MIDI..layout::MODE]);
        bytes[layout::MODE] = self.mode as u8;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::PACKED_LEN]) -> Self {
        let mut config = Self::default();
        config.write_key_switch_bytes(0, &bytes[layout::KEY_SWITCHES..layout::CALIBRATION]);
        config.write_calibration_bytes(0, &bytes[layout::CALIBRATION..layout::MIDI]);
        config.write_midi_bytes(0, &bytes[layout::MIDI..layout::MODE]);
        config.mode = Mode::from_byte(bytes[layout::MODE]);
        config
    }

    /// Copy packed key switch config bytes starting at `offset` within the
    /// region. The caller guarantees the span fits the region.
    pub fn read_key_switch_bytes(&self, offset: usize, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            let at = offset + i;
            let key = at / KeySwitchConfig::PACKED_LEN;
            *byte = self.key_switches[key].to_bytes()[at % KeySwitchConfig::PACKED_LEN];
        }
    }

    /// Patch packed key switch config bytes starting at `offset`. Byte
    /// granularity keeps concurrent ADC-side reads torn-word-safe.
    pub fn write_key_switch_bytes(&mut self, offset: usize, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let at = offset + i;
            let key = at / KeySwitchConfig::PACKED_LEN;
            let mut packed = self.key_switches[key].to_bytes();
            packed[at % KeySwitchConfig::PACKED_LEN] = byte;
            self.key_switches[key] = KeySwitchConfig::from_bytes(&packed);
        }
    }

    pub fn read_calibration_bytes(&self, offset: usize, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            let at = offset + i;
            let key = at / KeySwitchCalibration::PACKED_LEN;
            *byte = self.calibration[key].to_bytes()[at % KeySwitchCalibration::PACKED_LEN];
        }
    }

    pub fn write_calibration_bytes(&mut self, offset: usize, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let at = offset + i;
            let key = at / KeySwitchCalibration::PACKED_LEN;
            let mut packed = self.calibration[key].to_bytes();
            packed[at % KeySwitchCalibration::PACKED_LEN] = byte;
            self.calibration[key] = KeySwitchCalibration::from_bytes(&packed);
        }
    }

    pub fn read_midi_bytes(&self, offset: usize, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.midi[offset + i].note_number;
        }
    }

    pub fn write_midi_bytes(&mut self, offset: usize, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.midi[offset + i].note_number = byte;
        }
    }
}
