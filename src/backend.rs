//! Contracts for the hardware collaborators the core drives.
//!
//! The core never touches registers. A board crate implements these traits
//! on top of its HAL, installs the interrupt handlers, and forwards each
//! event to the matching [`crate::app::App`] entry point. Every trait here
//! is deliberately narrow so the whole pipeline can run against scripted
//! fakes on a host.

/// One of the two ADC pairs converted in parallel for each mux position.
///
/// Each group shares a DMA buffer half and finishes with a single
/// completion event carrying both samples.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcGroup {
    /// ADC1 + ADC2, feeding logical ADC channels 0 and 1.
    Adc12 = 0,
    /// ADC3 + ADC4, feeding logical ADC channels 2 and 3.
    Adc34 = 1,
}

impl AdcGroup {
    /// Logical ADC channel numbers of the two samples in this group, in
    /// buffer order.
    pub const fn adc_channels(self) -> [u8; 2] {
        match self {
            AdcGroup::Adc12 => [0, 1],
            AdcGroup::Adc34 => [2, 3],
        }
    }
}

/// 8:1 analog multiplexer in front of every ADC input.
pub trait AnalogMux {
    /// Route mux input `channel` (0..=7) to the ADCs.
    fn set_channel(&mut self, channel: u8);
}

/// Starts DMA conversions on the paired ADCs.
///
/// Completion is delivered asynchronously: the board's DMA interrupt reads
/// the two fresh samples out of its buffer and calls
/// [`crate::app::App::on_adc_group_complete`].
pub trait AdcBank {
    fn start_group(&mut self, group: AdcGroup);
}

/// USB endpoints the dispatcher emits into: one boot keyboard report or a
/// burst of MIDI event packets per scan round.
pub trait EventSink {
    /// Queue one 8-byte boot keyboard report (modifier byte + six usages).
    fn hid_keyboard_report(&mut self, modifier: u8, key_codes: &[u8; 6]);

    /// Queue one 4-byte USB-MIDI event packet.
    fn midi_write(&mut self, packet: [u8; 4]);
}

/// Virtual serial (CDC) link carrying the configuration protocol.
pub trait SerialLink {
    /// Drain up to `buf.len()` received bytes; returns how many were read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Queue bytes for transmission to the host.
    fn write(&mut self, data: &[u8]);

    /// Push queued bytes onto the wire.
    fn flush(&mut self);
}

/// A flash erase or program step reported failure; the configuration in
/// RAM stays authoritative.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashError;

/// On-chip flash region dedicated to the persisted configuration.
///
/// Erase granularity is two pages, program granularity a 16-bit half-word;
/// `offset` is relative to the start of the region.
pub trait ConfigFlash {
    fn unlock(&mut self);
    fn lock(&mut self);
    fn erase_pages(&mut self) -> Result<(), FlashError>;
    fn program_halfword(&mut self, offset: usize, value: u16) -> Result<(), FlashError>;

    /// Copy the stored region into `buf`. An erased region reads as 0xFF.
    fn read_region(&mut self, buf: &mut [u8]);
}

/// Value a board writes into its no-init RAM flag so the boot path enters
/// the system bootloader after the next reset. The boot path must clear the
/// flag before jumping to avoid a reset loop.
pub const BOOTLOADER_FLAG_MAGIC: u8 = 0x11;

/// Reset and bootloader hooks.
///
/// Both requests take effect after the current interrupt returns on real
/// hardware; the core always finishes its response traffic first.
pub trait SystemControl {
    /// Request a full system reset.
    fn system_reset(&mut self);

    /// Arm the retained bootloader flag ([`BOOTLOADER_FLAG_MAGIC`]) so the
    /// next reset lands in the ROM bootloader.
    fn set_bootloader_flag(&mut self);
}
