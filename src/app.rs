//! Top-level wiring: owns the configuration and every pipeline stage, and
//! exposes one entry point per interrupt context.
//!
//! A board crate instantiates [`App`] with its back-end implementation at
//! startup (before interrupts are unmasked), parks it in a
//! critical-section guarded cell, and forwards:
//!
//! - the 250 Hz timer interrupt to [`App::on_timer_tick`],
//! - each ADC DMA completion to [`App::on_adc_group_complete`],
//! - the CDC receive callback to [`App::on_serial_rx`].
//!
//! The scheduler guarantees those calls never interleave mid-sample on a
//! single-core target: configuration writes from the serial side become
//! visible to the scan side at the next sample or reconciliation point.

use crate::backend::{
    AdcBank, AdcGroup, AnalogMux, ConfigFlash, EventSink, SerialLink, SystemControl,
};
use crate::config::{Config, Mode};
use crate::configurator::Configurator;
use crate::flash;
use crate::keyboard::Keyboard;
use crate::scan::Scanner;

/// Everything the core needs from the hardware, as one object.
pub trait Board:
    AnalogMux + AdcBank + EventSink + SerialLink + ConfigFlash + SystemControl
{
}

impl<T> Board for T where
    T: AnalogMux + AdcBank + EventSink + SerialLink + ConfigFlash + SystemControl
{
}

pub struct App<B: Board> {
    board: B,
    config: Config,
    keyboard: Keyboard,
    scanner: Scanner,
    configurator: Configurator,
}

impl<B: Board> App<B> {
    /// Boot the core: load the stored configuration, or fall back to the
    /// built-in defaults and go straight into calibration so the envelopes
    /// get seeded before the first real use.
    pub fn new(mut board: B) -> Self {
        let (mut config, loaded) = flash::load_config(&mut board);
        if !loaded {
            config.mode = Mode::Calibrate;
        }
        info!("keyboard core up");
        Self {
            board,
            config,
            keyboard: Keyboard::new(),
            scanner: Scanner::new(),
            configurator: Configurator::new(),
        }
    }

    /// 250 Hz timer interrupt: emit the finished round, start the next.
    pub fn on_timer_tick(&mut self) {
        self.scanner.on_tick(&mut self.board, &mut self.keyboard, &mut self.config);
    }

    /// ADC DMA completion: `samples` are the two fresh conversions of
    /// `group` at the current mux position.
    pub fn on_adc_group_complete(&mut self, group: AdcGroup, samples: [u16; 2]) {
        self.scanner.on_group_complete(
            &mut self.board,
            &mut self.keyboard,
            &mut self.config,
            group,
            samples,
        );
    }

    /// CDC receive callback: run the configurator over whatever arrived.
    pub fn on_serial_rx(&mut self) {
        self.configurator.poll(&mut self.board, &mut self.config, &mut self.keyboard);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn board(&mut self) -> &mut B {
        &mut self.board
    }
}
