//! Firmware core for a 32-key analog Hall-effect keyboard.
//!
//! Each key sits on a linear magnetic sensor read through an 8:1 analog
//! mux by four parallel ADCs. A 250 Hz scan round converts all 32 keys,
//! runs each sample through a per-key state machine (calibration,
//! threshold, or rapid trigger), and emits one USB HID boot report or a
//! batch of USB-MIDI note events. A COBS-framed protocol on the CDC link
//! reads and writes the live configuration and persists it to on-chip
//! flash.
//!
//! The crate is hardware-agnostic: boards implement the narrow traits in
//! [`backend`] and forward their timer/DMA/USB interrupts to [`app::App`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod app;
pub mod backend;
pub mod cobs;
pub mod config;
pub mod configurator;
pub mod flash;
pub mod key_codes;
pub mod key_switch;
pub mod keyboard;
pub mod report;
pub mod scan;
pub mod sensor;

/// The matrix is fixed: 4 ADC channels x 8 mux positions.
pub const NUM_KEYS: usize = 32;

pub use app::{App, Board};
pub use backend::AdcGroup;
pub use config::{Config, KeySwitchCalibration, KeySwitchConfig, KeyType, MidiConfig, Mode};
pub use keyboard::Keyboard;
