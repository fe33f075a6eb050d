//! Persists the packed configuration image to the dedicated flash region.

use crate::backend::{ConfigFlash, FlashError};
use crate::config::Config;

/// An erased region reads back as all ones; a fresh device has no stored
/// configuration, detected from the first word.
const ERASED_SENTINEL: [u8; 4] = [0xFF; 4];

/// Write the configuration image: unlock, erase the backing pages, program
/// 16-bit half-words, lock. Locking happens even when a step fails; the
/// first failure aborts programming and surfaces to the caller, whose
/// in-RAM configuration stays authoritative.
pub fn save_config<F: ConfigFlash>(flash: &mut F, config: &Config) -> Result<(), FlashError> {
    flash.unlock();
    let result = program_image(flash, &config.to_bytes());
    flash.lock();
    match result {
        Ok(()) => info!("config saved to flash"),
        Err(_) => warn!("config save failed"),
    }
    result
}

fn program_image<F: ConfigFlash>(
    flash: &mut F,
    bytes: &[u8; Config::PACKED_LEN],
) -> Result<(), FlashError> {
    flash.erase_pages()?;
    for (index, half) in bytes.chunks_exact(2).enumerate() {
        flash.program_halfword(index * 2, u16::from_le_bytes([half[0], half[1]]))?;
    }
    Ok(())
}

/// Read the stored configuration, or fall back to the built-in defaults
/// when the region is erased. Returns `false` on the fallback so the
/// caller can force a calibration pass on first boot.
pub fn load_config<F: ConfigFlash>(flash: &mut F) -> (Config, bool) {
    let mut bytes = [0u8; Config::PACKED_LEN];
    flash.read_region(&mut bytes);
    if bytes[..4] == ERASED_SENTINEL {
        info!("no stored config, using defaults");
        return (Config::default(), false);
    }
    (Config::from_bytes(&bytes), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySwitchCalibration, KeyType, Mode};

    /// In-memory flash with per-step failure injection.
    struct FakeFlash {
        cells: Vec<u8>,
        unlocked: bool,
        locks: usize,
        fail_erase: bool,
        fail_program_at: Option<usize>,
    }

    impl FakeFlash {
        fn erased() -> Self {
            Self {
                cells: vec![0xFF; Config::PACKED_LEN],
                unlocked: false,
                locks: 0,
                fail_erase: false,
                fail_program_at: None,
            }
        }
    }

    impl ConfigFlash for FakeFlash {
        fn unlock(&mut self) {
            self.unlocked = true;
        }

        fn lock(&mut self) {
            self.unlocked = false;
            self.locks += 1;
        }

        fn erase_pages(&mut self) -> Result<(), FlashError> {
            assert!(self.unlocked, "erase requires unlock");
            if self.fail_erase {
                return Err(FlashError);
            }
            self.cells.fill(0xFF);
            Ok(())
        }

        fn program_halfword(&mut self, offset: usize, value: u16) -> Result<(), FlashError> {
            assert!(self.unlocked, "program requires unlock");
            if self.fail_program_at == Some(offset) {
                return Err(FlashError);
            }
            self.cells[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn read_region(&mut self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.cells);
        }
    }

    #[test]
    fn erased_flash_loads_defaults() {
        let mut flash = FakeFlash::erased();
        let (config, loaded) = load_config(&mut flash);
        assert!(!loaded);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut flash = FakeFlash::erased();
        let mut config = Config::default();
        config.key_switches[4].key_type = KeyType::RapidTrigger;
        config.calibration[9] = KeySwitchCalibration { min_value: 812, max_value: 3101 };
        config.midi[31].note_number = 41;
        config.mode = Mode::Midi;

        save_config(&mut flash, &config).unwrap();
        assert_eq!(flash.locks, 1);
        assert!(!flash.unlocked);

        let (restored, loaded) = load_config(&mut flash);
        assert!(loaded);
        assert_eq!(restored, config);
    }

    #[test]
    fn erase_failure_aborts_and_locks() {
        let mut flash = FakeFlash::erased();
        flash.fail_erase = true;
        assert_eq!(save_config(&mut flash, &Config::default()), Err(FlashError));
        assert!(!flash.unlocked, "flash must be re-locked after a failure");

        // Nothing was programmed, so a later load still sees defaults.
        let (_, loaded) = load_config(&mut flash);
        assert!(!loaded);
    }

    #[test]
    fn program_failure_surfaces() {
        let mut flash = FakeFlash::erased();
        flash.fail_program_at = Some(100);
        assert_eq!(save_config(&mut flash, &Config::default()), Err(FlashError));
        assert_eq!(flash.locks, 1);
    }
}
