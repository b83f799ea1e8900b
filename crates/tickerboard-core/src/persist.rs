//! Durable state: the per-slot quote history plus the wakeup-history ring,
//! loaded once at boot and committed exactly once before sleep.
//!
//! The codec is pure byte-slice work so torn-commit detection stays
//! host-testable; the flash backend only moves the encoded record. Any
//! mismatch on load (magic, version, bounds, checksum) decodes to `None`
//! and the firmware cold-starts instead of faulting.

use crate::config::{FirmwareConfig, MAX_STOCKS, MONTH_DATA_POINTS, SYMBOL_MAX_BYTES, WAKEUP_HISTORY_SIZE, YEAR_DATA_POINTS};
use crate::history::{WakeOutcome, WakeupEvent, WakeupHistory};
use crate::series::{PricePoint, SymbolSeries};
use crate::slot::{SlotStatus, SymbolSlot};

const STATE_MAGIC: u32 = 0x3142_4B54; // "TKB1"
const STATE_VERSION: u8 = 1;

const HEADER_BYTES: usize = 16;
const POINT_BYTES: usize = 8;
const SLOT_BYTES: usize = 1
    + SYMBOL_MAX_BYTES
    + 1
    + 8
    + 8
    + 2
    + MONTH_DATA_POINTS * POINT_BYTES
    + 2
    + YEAR_DATA_POINTS * POINT_BYTES;
const EVENT_BYTES: usize = 8 + 1 + 2;

/// Upper bound of one encoded record, checksum included.
pub const STATE_RECORD_MAX_BYTES: usize = HEADER_BYTES
    + 1
    + MAX_STOCKS * SLOT_BYTES
    + 1
    + WAKEUP_HISTORY_SIZE * EVENT_BYTES
    + 4;

/// One symbol slot with its price windows.
#[derive(Clone, Debug)]
pub struct SlotRecord {
    pub slot: SymbolSlot,
    pub series: SymbolSeries,
}

impl SlotRecord {
    pub const fn empty() -> Self {
        Self {
            slot: SymbolSlot::empty(),
            series: SymbolSeries::new(),
        }
    }

    pub fn for_symbol(symbol: &str) -> Self {
        Self {
            slot: SymbolSlot::for_symbol(symbol),
            series: SymbolSeries::new(),
        }
    }
}

/// Everything that survives a power cycle.
#[derive(Clone, Debug)]
pub struct PersistedState {
    pub slots: [SlotRecord; MAX_STOCKS],
    pub history: WakeupHistory,
    /// Best-known wall clock at the last commit; the fallback when time
    /// sync fails on the next wake.
    pub last_epoch: u64,
}

impl PersistedState {
    pub const fn new() -> Self {
        Self {
            slots: [const { SlotRecord::empty() }; MAX_STOCKS],
            history: WakeupHistory::new(),
            last_epoch: 0,
        }
    }

    /// Fresh state for the configured symbol list.
    pub fn cold_start(config: &FirmwareConfig) -> Self {
        let mut state = Self::new();
        state.adopt_symbols(config);
        state
    }

    /// Re-align loaded slots with the configured symbol list: matching
    /// symbols keep their history, everything else starts fresh. Handles
    /// reflashing with a different watchlist without faulting on load.
    pub fn adopt_symbols(&mut self, config: &FirmwareConfig) {
        let mut adopted: [SlotRecord; MAX_STOCKS] = [const { SlotRecord::empty() }; MAX_STOCKS];
        for (index, symbol) in config.symbols.iter().enumerate() {
            if symbol.is_empty() {
                continue;
            }
            let existing = self
                .slots
                .iter()
                .find(|record| record.slot.symbol.as_str() == *symbol);
            adopted[index] = match existing {
                Some(record) => record.clone(),
                None => SlotRecord::for_symbol(symbol),
            };
        }
        self.slots = adopted;
    }

    pub fn active_slots(&self) -> impl Iterator<Item = &SlotRecord> {
        self.slots.iter().filter(|record| record.slot.is_active())
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Abstract durable backend (flash sector, host file, test memory).
pub trait StateStore {
    type Error;

    fn load(&mut self) -> Result<Option<PersistedState>, Self::Error>;
    fn save(&mut self, state: &PersistedState) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecError {
    BufferTooSmall,
}

/// FNV-1a over the record body; cheap and good enough to catch a torn
/// multi-sector commit.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.put(&[value])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.put(&value.to_le_bytes())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.put(&value.to_le_bytes())
    }

    fn put_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.put(&value.to_le_bytes())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn take_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn take_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }
}

fn put_series<const N: usize>(
    writer: &mut Writer<'_>,
    series: &crate::series::PriceSeries<N>,
) -> Result<(), CodecError> {
    writer.put_u16(series.len() as u16)?;
    for point in series.iter() {
        writer.put_u32(point.day)?;
        writer.put_u32(point.close.to_bits())?;
    }
    Ok(())
}

fn take_series<const N: usize>(
    reader: &mut Reader<'_>,
    series: &mut crate::series::PriceSeries<N>,
) -> Option<()> {
    let len = reader.take_u16()? as usize;
    if len > N {
        return None;
    }
    for _ in 0..len {
        let day = reader.take_u32()?;
        let close = f32::from_bits(reader.take_u32()?);
        series.push(PricePoint { day, close });
    }
    if series.len() != len {
        // Stored points were not strictly ordered; refuse the record.
        return None;
    }
    Some(())
}

/// Serialize `state` into `buf`, returning the record length.
pub fn encode_state(state: &PersistedState, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut writer = Writer::new(buf);
    writer.put_u32(STATE_MAGIC)?;
    writer.put_u8(STATE_VERSION)?;
    writer.put_u8(0)?; // flags, reserved
    writer.put_u16(0)?; // record length, patched below
    writer.put_u64(state.last_epoch)?;

    writer.put_u8(MAX_STOCKS as u8)?;
    for record in &state.slots {
        let symbol = record.slot.symbol.as_bytes();
        writer.put_u8(symbol.len() as u8)?;
        let mut padded = [0u8; SYMBOL_MAX_BYTES];
        padded[..symbol.len()].copy_from_slice(symbol);
        writer.put(&padded)?;
        writer.put_u8(match record.slot.status {
            SlotStatus::NeverAttempted => 0,
            SlotStatus::Success => 1,
            SlotStatus::Failed => 2,
        })?;
        writer.put_u64(record.slot.last_success_epoch)?;
        writer.put_u64(record.slot.cooldown_until)?;
        put_series(&mut writer, &record.series.month)?;
        put_series(&mut writer, &record.series.year)?;
    }

    writer.put_u8(state.history.len() as u8)?;
    for event in state.history.iter() {
        writer.put_u64(event.epoch)?;
        writer.put_u8(match event.outcome {
            WakeOutcome::Success => 0,
            WakeOutcome::PartialFailure => 1,
            WakeOutcome::TotalFailure => 2,
            WakeOutcome::BatteryLow => 3,
        })?;
        writer.put_u16(event.battery_mv)?;
    }

    let record_len = writer.pos + 4;
    let checksum_at = writer.pos;
    writer.put_u32(0)?; // checksum, patched below

    buf[6..8].copy_from_slice(&(record_len as u16).to_le_bytes());
    let checksum = checksum32(&buf[..checksum_at]);
    buf[checksum_at..record_len].copy_from_slice(&checksum.to_le_bytes());
    Ok(record_len)
}

/// Deserialize a record, `None` on any corruption or version mismatch.
pub fn decode_state(buf: &[u8]) -> Option<PersistedState> {
    let mut reader = Reader::new(buf);
    if reader.take_u32()? != STATE_MAGIC {
        return None;
    }
    if reader.take_u8()? != STATE_VERSION {
        return None;
    }
    let _flags = reader.take_u8()?;
    let record_len = reader.take_u16()? as usize;
    if record_len < HEADER_BYTES + 4 || record_len > buf.len() {
        return None;
    }
    let expected = u32::from_le_bytes([
        buf[record_len - 4],
        buf[record_len - 3],
        buf[record_len - 2],
        buf[record_len - 1],
    ]);
    if checksum32(&buf[..record_len - 4]) != expected {
        return None;
    }

    let mut state = PersistedState::new();
    state.last_epoch = reader.take_u64()?;

    let slot_count = reader.take_u8()? as usize;
    if slot_count != MAX_STOCKS {
        return None;
    }
    for record in &mut state.slots {
        let symbol_len = reader.take_u8()? as usize;
        if symbol_len > SYMBOL_MAX_BYTES {
            return None;
        }
        let padded = reader.take(SYMBOL_MAX_BYTES)?;
        let symbol = core::str::from_utf8(&padded[..symbol_len]).ok()?;
        record.slot = SymbolSlot::for_symbol(symbol);
        record.slot.status = match reader.take_u8()? {
            0 => SlotStatus::NeverAttempted,
            1 => SlotStatus::Success,
            2 => SlotStatus::Failed,
            _ => return None,
        };
        record.slot.last_success_epoch = reader.take_u64()?;
        record.slot.cooldown_until = reader.take_u64()?;
        take_series(&mut reader, &mut record.series.month)?;
        take_series(&mut reader, &mut record.series.year)?;
    }

    let history_len = reader.take_u8()? as usize;
    if history_len > WAKEUP_HISTORY_SIZE {
        return None;
    }
    for _ in 0..history_len {
        let epoch = reader.take_u64()?;
        let outcome = match reader.take_u8()? {
            0 => WakeOutcome::Success,
            1 => WakeOutcome::PartialFailure,
            2 => WakeOutcome::TotalFailure,
            3 => WakeOutcome::BatteryLow,
            _ => return None,
        };
        let battery_mv = reader.take_u16()?;
        state.history.push(WakeupEvent {
            epoch,
            outcome,
            battery_mv,
        });
    }

    if reader.pos != record_len - 4 {
        return None;
    }
    Some(state)
}
