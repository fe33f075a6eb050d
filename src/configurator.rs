//! Framed read/write protocol over the virtual serial link.
//!
//! Requests are COBS-encoded packets terminated by 0x00. The decoded
//! payload is `func_code, addr_hi, addr_lo, length[, data…]`, addressing a
//! flat 16-bit space that windows the live configuration, the calibration
//! envelopes, the per-key positions, a block of control commands, and the
//! mode byte. Every well-delimited non-empty frame gets exactly one
//! response in the same shape, led by a status byte.

use crate::backend::{ConfigFlash, SerialLink, SystemControl};
use crate::cobs;
use crate::config::{layout, Config, Mode};
use crate::flash;
use crate::keyboard::Keyboard;
use crate::NUM_KEYS;

use heapless::Deque;

const FRAME_DELIMITER: u8 = 0x00;

const FUNC_READ: u8 = 0;
const FUNC_WRITE: u8 = 1;

const STATUS_OK: u8 = 0x00;
const STATUS_ERROR: u8 = 0x01;

/// Request/response header length: func/status, addr_hi, addr_lo, length.
const HEADER_LEN: usize = 4;

/// Hard cap on a response payload before encoding.
const MAX_RESPONSE_LEN: usize = 512;

/// Receive queue capacity; oldest bytes are dropped on overflow.
const RX_CAPACITY: usize = 512;

mod address {
    /// Key switch configs, 32 x 5 bytes.
    pub const KEY_SWITCHES: u16 = 0x0000;
    /// MIDI note numbers, 32 x 1 byte.
    pub const MIDI: u16 = 0x0100;
    /// Calibration envelopes, 32 x 4 bytes.
    pub const CALIBRATION: u16 = 0x1000;
    /// Live key positions, 32 x 1 byte, read-only.
    pub const POSITION: u16 = 0x2000;
    /// Control commands, write-only, length 1.
    pub const CONTROL: u16 = 0x3000;
    pub const CONTROL_SAVE: u16 = 0x3000;
    pub const CONTROL_CALIBRATE: u16 = 0x3001;
    pub const CONTROL_FACTORY_RESET: u16 = 0x3002;
    pub const CONTROL_SYSTEM_RESET: u16 = 0x3003;
    pub const CONTROL_BOOTLOADER: u16 = 0x3004;
    pub const CONTROL_END: u16 = 0x3005;
    /// Global mode byte.
    pub const MODE: u16 = 0x4000;
}

/// Whether `[addr, addr+len)` fits inside the region starting at `base`
/// with `region_len` bytes.
fn in_region(addr: u16, len: usize, base: u16, region_len: usize) -> bool {
    let addr = addr as usize;
    let base = base as usize;
    addr >= base && addr + len <= base + region_len
}

/// Protocol engine; owns only the receive queue. Configuration, keyboard
/// and the serial/flash/reset back-ends are borrowed per poll, so the
/// caller decides where the shared state lives.
pub struct Configurator {
    rx: Deque<u8, RX_CAPACITY>,
}

impl Default for Configurator {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurator {
    pub fn new() -> Self {
        Self { rx: Deque::new() }
    }

    /// Drain the serial link, accumulating bytes until a frame delimiter,
    /// and answer every complete frame. Runs from the USB receive callback.
    pub fn poll<B>(&mut self, board: &mut B, config: &mut Config, keyboard: &mut Keyboard)
    where
        B: SerialLink + ConfigFlash + SystemControl,
    {
        let mut chunk = [0u8; 64];
        loop {
            let n = board.read(&mut chunk);
            if n == 0 {
                return;
            }
            for &byte in &chunk[..n] {
                if byte == FRAME_DELIMITER {
                    // A delimiter with nothing buffered is a resync, not a
                    // frame.
                    if !self.rx.is_empty() {
                        self.process_frame(board, config, keyboard);
                    }
                } else {
                    if self.rx.is_full() {
                        self.rx.pop_front();
                    }
                    let _ = self.rx.push_back(byte);
                }
            }
        }
    }

    fn process_frame<B>(&mut self, board: &mut B, config: &mut Config, keyboard: &mut Keyboard)
    where
        B: SerialLink + ConfigFlash + SystemControl,
    {
        let mut encoded = [0u8; RX_CAPACITY];
        let mut encoded_len = 0;
        while let Some(byte) = self.rx.pop_front() {
            encoded[encoded_len] = byte;
            encoded_len += 1;
        }

        let mut request = [0u8; RX_CAPACITY];
        let Some(request_len) = cobs::decode(&encoded[..encoded_len], &mut request) else {
            debug!("configurator: undecodable frame");
            respond_error(board, 0, 0);
            return;
        };
        if request_len < HEADER_LEN {
            debug!("configurator: short frame");
            respond_error(board, 0, 0);
            return;
        }

        let func_code = request[0];
        let addr = u16::from_be_bytes([request[1], request[2]]);
        let length = request[3] as usize;

        match func_code {
            FUNC_READ => self.read(board, config, keyboard, addr, length),
            FUNC_WRITE => {
                if request_len != length + HEADER_LEN {
                    debug!("configurator: write length mismatch");
                    respond_error(board, request[1], request[2]);
                    return;
                }
                let data = &request[HEADER_LEN..request_len];
                self.write(board, config, addr, data);
            }
            _ => respond_error(board, request[1], request[2]),
        }
    }

    fn read<B>(
        &mut self,
        board: &mut B,
        config: &mut Config,
        keyboard: &mut Keyboard,
        addr: u16,
        length: usize,
    ) where
        B: SerialLink,
    {
        let [addr_hi, addr_lo] = addr.to_be_bytes();
        if HEADER_LEN + length > MAX_RESPONSE_LEN {
            respond_error(board, addr_hi, addr_lo);
            return;
        }

        let mut response = [0u8; MAX_RESPONSE_LEN];
        response[0] = STATUS_OK;
        response[1] = addr_hi;
        response[2] = addr_lo;
        response[3] = length as u8;
        let data = &mut response[HEADER_LEN..HEADER_LEN + length];

        if in_region(addr, length, address::KEY_SWITCHES, layout::KEY_SWITCHES_LEN) {
            config.read_key_switch_bytes((addr - address::KEY_SWITCHES) as usize, data);
        } else if in_region(addr, length, address::MIDI, layout::MIDI_LEN) {
            config.read_midi_bytes((addr - address::MIDI) as usize, data);
        } else if in_region(addr, length, address::CALIBRATION, layout::CALIBRATION_LEN) {
            config.read_calibration_bytes((addr - address::CALIBRATION) as usize, data);
        } else if in_region(addr, length, address::POSITION, NUM_KEYS) {
            let base = (addr - address::POSITION) as usize;
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = keyboard.position(base + i);
            }
        } else if addr == address::MODE && length <= 1 {
            if let Some(byte) = data.first_mut() {
                *byte = config.mode as u8;
            }
        } else {
            respond_error(board, addr_hi, addr_lo);
            return;
        }

        respond(board, &response[..HEADER_LEN + length]);
    }

    fn write<B>(&mut self, board: &mut B, config: &mut Config, addr: u16, data: &[u8])
    where
        B: SerialLink + ConfigFlash + SystemControl,
    {
        let [addr_hi, addr_lo] = addr.to_be_bytes();
        let length = data.len();

        if in_region(addr, length, address::KEY_SWITCHES, layout::KEY_SWITCHES_LEN) {
            config.write_key_switch_bytes((addr - address::KEY_SWITCHES) as usize, data);
        } else if in_region(addr, length, address::MIDI, layout::MIDI_LEN) {
            config.write_midi_bytes((addr - address::MIDI) as usize, data);
        } else if in_region(addr, length, address::CALIBRATION, layout::CALIBRATION_LEN) {
            config.write_calibration_bytes((addr - address::CALIBRATION) as usize, data);
        } else if (address::CONTROL..address::CONTROL_END).contains(&addr) && length == 1 {
            self.control(board, config, addr, data[0]);
            return;
        } else if addr == address::MODE && length == 1 {
            // Out-of-range mode values are acknowledged but ignored.
            if data[0] <= Mode::Midi as u8 {
                config.mode = Mode::from_byte(data[0]);
            }
        } else {
            respond_error(board, addr_hi, addr_lo);
            return;
        }

        respond(board, &[STATUS_OK, addr_hi, addr_lo, 0x00]);
    }

    /// Length-1 control writes. Reset-flavored commands acknowledge first
    /// so the host sees the response before the port disappears.
    fn control<B>(&mut self, board: &mut B, config: &mut Config, addr: u16, value: u8)
    where
        B: SerialLink + ConfigFlash + SystemControl,
    {
        let [addr_hi, addr_lo] = addr.to_be_bytes();
        let mut status = STATUS_OK;
        match addr {
            address::CONTROL_SAVE => {
                if flash::save_config(board, config).is_err() {
                    status = STATUS_ERROR;
                }
            }
            address::CONTROL_CALIBRATE => {
                config.mode = if value == 0 { Mode::Keyboard } else { Mode::Calibrate };
            }
            address::CONTROL_FACTORY_RESET => {
                *config = Config::default();
                config.mode = Mode::Disabled;
            }
            address::CONTROL_SYSTEM_RESET => {
                respond(board, &[STATUS_OK, addr_hi, addr_lo, 0x00]);
                board.system_reset();
                return;
            }
            address::CONTROL_BOOTLOADER => {
                respond(board, &[STATUS_OK, addr_hi, addr_lo, 0x00]);
                board.set_bootloader_flag();
                board.system_reset();
                return;
            }
            _ => status = STATUS_ERROR,
        }
        respond(board, &[status, addr_hi, addr_lo, 0x00]);
    }
}

fn respond<B: SerialLink>(board: &mut B, payload: &[u8]) {
    let mut encoded = [0u8; cobs::max_encoded_len(MAX_RESPONSE_LEN) + 1];
    let encoded_len = cobs::encode(payload, &mut encoded);
    encoded[encoded_len] = FRAME_DELIMITER;
    board.write(&encoded[..encoded_len + 1]);
    board.flush();
}

/// Standardized framed error: status 0x01 with the echoed address (zeros
/// when the header never decoded).
fn respond_error<B: SerialLink>(board: &mut B, addr_hi: u8, addr_lo: u8) {
    respond(board, &[STATUS_ERROR, addr_hi, addr_lo, 0x00]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FlashError;
    use crate::config::{KeySwitchCalibration, KeyType};

    /// Serial + flash + reset test double with scripted inbound bytes.
    #[derive(Default)]
    struct Host {
        inbound: Vec<u8>,
        outbound: Vec<u8>,
        flushes: usize,
        stored: Vec<u8>,
        fail_erase: bool,
        resets: usize,
        bootloader_armed: bool,
    }

    impl SerialLink for Host {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = self.inbound.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
                *slot = byte;
            }
            n
        }

        fn write(&mut self, data: &[u8]) {
            self.outbound.extend_from_slice(data);
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    impl ConfigFlash for Host {
        fn unlock(&mut self) {}
        fn lock(&mut self) {}

        fn erase_pages(&mut self) -> Result<(), FlashError> {
            if self.fail_erase {
                return Err(FlashError);
            }
            self.stored = vec![0xFF; Config::PACKED_LEN];
            Ok(())
        }

        fn program_halfword(&mut self, offset: usize, value: u16) -> Result<(), FlashError> {
            self.stored[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn read_region(&mut self, buf: &mut [u8]) {
            if self.stored.is_empty() {
                buf.fill(0xFF);
            } else {
                buf.copy_from_slice(&self.stored);
            }
        }
    }

    impl SystemControl for Host {
        fn system_reset(&mut self) {
            self.resets += 1;
        }

        fn set_bootloader_flag(&mut self) {
            self.bootloader_armed = true;
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut encoded = vec![0u8; cobs::max_encoded_len(payload.len()) + 1];
        let n = cobs::encode(payload, &mut encoded);
        encoded.truncate(n);
        encoded.push(0x00);
        encoded
    }

    /// Send one request and return the decoded responses it produced.
    fn transact(
        configurator: &mut Configurator,
        host: &mut Host,
        config: &mut Config,
        keyboard: &mut Keyboard,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        host.inbound.extend_from_slice(&frame(payload));
        configurator.poll(host, config, keyboard);

        let mut responses = Vec::new();
        for raw in host.outbound.split(|&byte| byte == 0x00) {
            if raw.is_empty() {
                continue;
            }
            let mut decoded = vec![0u8; raw.len()];
            let n = cobs::decode(raw, &mut decoded).expect("response must decode");
            decoded.truncate(n);
            responses.push(decoded);
        }
        host.outbound.clear();
        responses
    }

    fn fixtures() -> (Configurator, Host, Config, Keyboard) {
        (Configurator::new(), Host::default(), Config::default(), Keyboard::new())
    }

    #[test]
    fn reads_key_switch_config() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0, 0, 5]);
        assert_eq!(responses, [vec![0x00, 0, 0, 5, 0x29, 2, 10, 2, 2]]);
        assert_eq!(host.flushes, 1);
    }

    #[test]
    fn out_of_range_read_errors() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0xFF, 0xFF, 4]);
        assert_eq!(responses, [vec![0x01, 0xFF, 0xFF, 0]]);
    }

    #[test]
    fn read_spanning_region_end_errors() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        // Key switch region is 160 bytes; 158 + 5 runs past it.
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0, 158, 5]);
        assert_eq!(responses, [vec![0x01, 0, 158, 0]]);
    }

    #[test]
    fn short_frame_gets_standard_error() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0]);
        assert_eq!(responses, [vec![0x01, 0, 0, 0]]);
    }

    #[test]
    fn undecodable_frame_gets_standard_error() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        // 0x05 promises four data bytes that never arrive.
        host.inbound.extend_from_slice(&[0x05, 0x11, 0x00]);
        configurator.poll(&mut host, &mut config, &mut keyboard);
        let mut decoded = vec![0u8; 8];
        let raw: Vec<u8> = host.outbound.clone();
        let body = &raw[..raw.len() - 1];
        let n = cobs::decode(body, &mut decoded).unwrap();
        assert_eq!(&decoded[..n], [0x01, 0, 0, 0]);
    }

    #[test]
    fn bare_delimiters_are_silent() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        host.inbound.extend_from_slice(&[0x00, 0x00, 0x00]);
        configurator.poll(&mut host, &mut config, &mut keyboard);
        assert!(host.outbound.is_empty());
    }

    #[test]
    fn frames_survive_split_polls() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let framed = frame(&[0, 0, 0, 5]);
        let (first, second) = framed.split_at(3);

        host.inbound.extend_from_slice(first);
        configurator.poll(&mut host, &mut config, &mut keyboard);
        assert!(host.outbound.is_empty());

        host.inbound.extend_from_slice(second);
        configurator.poll(&mut host, &mut config, &mut keyboard);
        assert!(!host.outbound.is_empty());
    }

    #[test]
    fn writes_key_switch_config() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        // Retype key 1 (offset 5..10): usage 0x04, RapidTrigger, point 15.
        let responses = transact(
            &mut configurator,
            &mut host,
            &mut config,
            &mut keyboard,
            &[1, 0, 5, 5, 0x04, 3, 15, 3, 4],
        );
        assert_eq!(responses, [vec![0x00, 0, 5, 0]]);
        assert_eq!(config.key_switches[1].key_code, 0x04);
        assert_eq!(config.key_switches[1].key_type, KeyType::RapidTrigger);
        assert_eq!(config.key_switches[1].actuation_point, 15);
        assert_eq!(config.key_switches[1].rapid_up_sensitivity, 3);
        assert_eq!(config.key_switches[1].rapid_down_sensitivity, 4);
    }

    #[test]
    fn write_length_mismatch_errors() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses = transact(
            &mut configurator,
            &mut host,
            &mut config,
            &mut keyboard,
            &[1, 0, 0, 4, 0xAA], // header says 4 bytes, one present
        );
        assert_eq!(responses, [vec![0x01, 0, 0, 0]]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn writes_and_reads_midi_notes() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses = transact(
            &mut configurator,
            &mut host,
            &mut config,
            &mut keyboard,
            &[1, 0x01, 2, 2, 100, 101],
        );
        assert_eq!(responses, [vec![0x00, 0x01, 2, 0]]);
        assert_eq!(config.midi[2].note_number, 100);
        assert_eq!(config.midi[3].note_number, 101);

        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0x01, 2, 2]);
        assert_eq!(responses, [vec![0x00, 0x01, 2, 2, 100, 101]]);
    }

    #[test]
    fn calibration_window_reads_min_then_max() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        config.calibration[3] = KeySwitchCalibration { min_value: 500, max_value: 3000 };
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0x10, 12, 4]);
        assert_eq!(responses, [vec![0x00, 0x10, 12, 4, 0xF4, 0x01, 0xB8, 0x0B]]);
    }

    #[test]
    fn position_window_is_read_only() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0x20, 0, 2]);
        assert_eq!(responses, [vec![0x00, 0x20, 0, 2, 0, 0]]);

        let responses = transact(
            &mut configurator,
            &mut host,
            &mut config,
            &mut keyboard,
            &[1, 0x20, 0, 1, 40],
        );
        assert_eq!(responses, [vec![0x01, 0x20, 0, 0]]);
    }

    #[test]
    fn mode_round_trips_and_rejects_garbage() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x40, 0, 1, 3]);
        assert_eq!(responses, [vec![0x00, 0x40, 0, 0]]);
        assert_eq!(config.mode, Mode::Midi);

        // Unknown mode value: acknowledged, not applied.
        transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x40, 0, 1, 9]);
        assert_eq!(config.mode, Mode::Midi);

        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0x40, 0, 1]);
        assert_eq!(responses, [vec![0x00, 0x40, 0, 1, 3]]);
    }

    #[test]
    fn calibration_control_toggles_mode() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 1, 1, 1]);
        assert_eq!(config.mode, Mode::Calibrate);
        transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 1, 1, 0]);
        assert_eq!(config.mode, Mode::Keyboard);
    }

    #[test]
    fn save_control_reports_flash_outcome() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        config.midi[0].note_number = 77;
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 0, 1, 1]);
        assert_eq!(responses, [vec![0x00, 0x30, 0, 0]]);
        assert_eq!(host.stored, config.to_bytes());

        host.fail_erase = true;
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 0, 1, 1]);
        assert_eq!(responses, [vec![0x01, 0x30, 0, 0]]);
    }

    #[test]
    fn factory_reset_restores_defaults_disabled() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        config.midi[0].note_number = 1;
        config.key_switches[0].actuation_point = 30;
        transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 2, 1, 1]);
        let mut expected = Config::default();
        expected.mode = Mode::Disabled;
        assert_eq!(config, expected);
    }

    #[test]
    fn reset_controls_ack_then_reset() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 3, 1, 1]);
        assert_eq!(responses, [vec![0x00, 0x30, 3, 0]]);
        assert_eq!(host.resets, 1);
        assert!(!host.bootloader_armed);

        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 4, 1, 1]);
        assert_eq!(responses, [vec![0x00, 0x30, 4, 0]]);
        assert_eq!(host.resets, 2);
        assert!(host.bootloader_armed);
    }

    #[test]
    fn unknown_control_or_bad_length_errors() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[1, 0x30, 5, 1, 1]);
        assert_eq!(responses, [vec![0x01, 0x30, 5, 0]]);

        let responses = transact(
            &mut configurator,
            &mut host,
            &mut config,
            &mut keyboard,
            &[1, 0x30, 0, 2, 1, 1],
        );
        assert_eq!(responses, [vec![0x01, 0x30, 0, 0]]);
    }

    #[test]
    fn control_reads_are_out_of_range() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let responses =
            transact(&mut configurator, &mut host, &mut config, &mut keyboard, &[0, 0x30, 0, 1]);
        assert_eq!(responses, [vec![0x01, 0x30, 0, 0]]);
    }

    #[test]
    fn two_frames_in_one_poll_get_two_responses() {
        let (mut configurator, mut host, mut config, mut keyboard) = fixtures();
        let mut bytes = frame(&[0, 0x40, 0, 1]);
        bytes.extend_from_slice(&frame(&[0, 0x01, 0, 1]));
        host.inbound = bytes;
        configurator.poll(&mut host, &mut config, &mut keyboard);

        let frames: Vec<&[u8]> =
            host.outbound.split(|&byte| byte == 0).filter(|raw| !raw.is_empty()).collect();
        assert_eq!(frames.len(), 2);
    }
}
