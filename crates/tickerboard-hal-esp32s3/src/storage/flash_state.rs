//! Flash-backed persisted-state store.
//!
//! The encoded record (core codec, checksum-trailed) lives in the trailing
//! sectors of the first writable data partition. A commit erases the region
//! and rewrites the whole record in one pass; a power cut mid-write leaves
//! bytes the checksum rejects on the next boot, so the firmware cold-starts
//! instead of faulting on a torn commit.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::warn;
use tickerboard_core::persist::{
    PersistedState, STATE_RECORD_MAX_BYTES, StateStore, decode_state, encode_state,
};

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;
/// Sectors reserved at the tail of the partition for one record.
const STATE_SECTORS: u32 = STATE_RECORD_MAX_BYTES.div_ceil(FLASH_SECTOR_SIZE as usize) as u32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashStateError {
    PartitionTable,
    StatePartitionMissing,
    PartitionTooSmall,
    ScratchTooSmall,
    FlashOpFailed(i32),
    Encode,
    Unsupported,
}

#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, FlashStateError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashStateError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashStateError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashStateError::Unsupported);
        }

        let sector = sector_addr / FLASH_SECTOR_SIZE;
        let rc = unsafe { esp_rom_spiflash_erase_sector(sector) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashStateError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashStateError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashStateError::Unsupported);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashStateError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashStateError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashStateError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashStateError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashStateError> {
        if out.is_empty() {
            return Ok(());
        }

        let mut written = 0usize;
        let start = addr & !0b11;
        let end = (addr + out.len() as u32 + 3) & !0b11;

        for word_addr in (start..end).step_by(4) {
            let word = self.read_word(word_addr)?;
            let bytes = word.to_le_bytes();

            let base = word_addr as i64 - addr as i64;
            for (i, b) in bytes.iter().enumerate() {
                let dst = base + i as i64;
                if dst < 0 {
                    continue;
                }
                let dst = dst as usize;
                if dst >= out.len() {
                    break;
                }
                out[dst] = *b;
                written += 1;
            }
        }

        if written == out.len() {
            Ok(())
        } else {
            Err(FlashStateError::FlashOpFailed(-1))
        }
    }

    fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStateError> {
        if data.is_empty() {
            return Ok(());
        }

        let start = addr & !0b11;
        let end = (addr + data.len() as u32 + 3) & !0b11;

        for word_addr in (start..end).step_by(4) {
            let mut bytes = [0xFFu8; 4];
            let base = word_addr as i64 - addr as i64;
            for (i, slot) in bytes.iter_mut().enumerate() {
                let src = base + i as i64;
                if src < 0 {
                    continue;
                }
                let src = src as usize;
                if src >= data.len() {
                    break;
                }
                *slot = data[src];
            }

            self.write_word(word_addr, u32::from_le_bytes(bytes))?;
        }

        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashStateError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashStateError::Unsupported)
    }
}

/// State store over the tail of the first writable data partition. The
/// caller supplies the encode/decode scratch so the 9 KiB record never
/// lands on a task stack.
#[derive(Debug)]
pub struct FlashStateStore<'b> {
    flash: RawFlash,
    region_addr: u32,
    scratch: &'b mut [u8],
}

impl<'b> FlashStateStore<'b> {
    pub fn new(scratch: &'b mut [u8]) -> Result<Self, FlashStateError> {
        if scratch.len() < STATE_RECORD_MAX_BYTES {
            return Err(FlashStateError::ScratchTooSmall);
        }

        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashStateError::PartitionTable)?;

        let region_bytes = STATE_SECTORS * FLASH_SECTOR_SIZE;
        let mut best_data_undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;

        for entry in table.iter() {
            if entry.is_read_only() {
                continue;
            }

            if entry.len() < region_bytes {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    best_data_undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) => {
                    if fallback_nvs.is_none() {
                        fallback_nvs = Some((entry.offset(), entry.len()));
                    }
                }
                _ => {}
            }
        }

        let (offset, len) = best_data_undefined
            .or(fallback_nvs)
            .ok_or(FlashStateError::StatePartitionMissing)?;

        if len < region_bytes {
            return Err(FlashStateError::PartitionTooSmall);
        }

        let region_addr = offset + len - region_bytes;
        Ok(Self {
            flash,
            region_addr,
            scratch,
        })
    }
}

impl StateStore for FlashStateStore<'_> {
    type Error = FlashStateError;

    fn load(&mut self) -> Result<Option<PersistedState>, Self::Error> {
        let buf = &mut self.scratch[..STATE_RECORD_MAX_BYTES];
        self.flash.read_bytes(self.region_addr, buf)?;

        if buf.iter().all(|b| *b == 0xFF) {
            return Ok(None);
        }

        match decode_state(buf) {
            Some(state) => Ok(Some(state)),
            None => {
                warn!("persisted record failed validation; cold start");
                Ok(None)
            }
        }
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), Self::Error> {
        let len = encode_state(state, self.scratch).map_err(|_| FlashStateError::Encode)?;

        for sector in 0..STATE_SECTORS {
            self.flash
                .erase_sector(self.region_addr + sector * FLASH_SECTOR_SIZE)?;
        }
        self.flash.write_erased_bytes(self.region_addr, &self.scratch[..len])
    }
}
