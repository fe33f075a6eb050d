//! Scan scheduler: one 250 Hz tick sweeps all 8 mux positions, converting
//! four keys per position through the two parallel ADC groups.

use crate::backend::{AdcBank, AdcGroup, AnalogMux, EventSink};
use crate::config::Config;
use crate::keyboard::Keyboard;

pub const MUX_CHANNELS: u8 = 8;

/// Round state: mux cursor plus the completion slots of the two ADC
/// groups. The dispatcher only ever observes whole rounds; a round that
/// overruns its tick is skipped, not torn.
pub struct Scanner {
    channel: u8,
    running: bool,
    pending: [Option<[u16; 2]>; 2],
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self { channel: 0, running: false, pending: [None, None] }
    }

    /// Whether a scan round is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Timer tick: publish the previous round's output, then start a new
    /// sweep. A still-running round means the ADCs fell behind; that tick's
    /// sweep is skipped and the output simply repeats one period later.
    pub fn on_tick<B>(&mut self, board: &mut B, keyboard: &mut Keyboard, config: &mut Config)
    where
        B: AnalogMux + AdcBank + EventSink,
    {
        if self.running {
            warn!("scan overrun, skipping tick");
            return;
        }

        keyboard.dispatch(config, board);

        self.running = true;
        self.channel = 0;
        self.pending = [None, None];
        board.set_channel(self.channel);
        board.start_group(AdcGroup::Adc12);
        board.start_group(AdcGroup::Adc34);
    }

    /// DMA completion for one ADC group at the current mux position. Once
    /// both groups land, their four samples update the routed keys and the
    /// sweep advances.
    pub fn on_group_complete<B>(
        &mut self,
        board: &mut B,
        keyboard: &mut Keyboard,
        config: &mut Config,
        group: AdcGroup,
        samples: [u16; 2],
    ) where
        B: AnalogMux + AdcBank,
    {
        if !self.running {
            debug!("stray adc completion");
            return;
        }
        self.pending[group as usize] = Some(samples);

        let (Some(low), Some(high)) = (self.pending[0], self.pending[1]) else {
            return;
        };
        self.pending = [None, None];

        for (group, pair) in [(AdcGroup::Adc12, low), (AdcGroup::Adc34, high)] {
            let channels = group.adc_channels();
            keyboard.feed_sample(config, channels[0], self.channel, pair[0]);
            keyboard.feed_sample(config, channels[1], self.channel, pair[1]);
        }

        self.channel = (self.channel + 1) % MUX_CHANNELS;
        if self.channel == 0 {
            self.running = false;
        } else {
            board.set_channel(self.channel);
            board.start_group(AdcGroup::Adc12);
            board.start_group(AdcGroup::Adc34);
        }
    }
}
