//! Symbol slots and the per-symbol retry/cooldown state machine.

use heapless::String;

use crate::config::SYMBOL_MAX_BYTES;

pub type SymbolString = String<SYMBOL_MAX_BYTES>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotStatus {
    NeverAttempted,
    Success,
    Failed,
}

/// One configured ticker slot. An empty symbol marks the slot inactive;
/// inactive slots are never fetched, rendered, or counted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolSlot {
    pub symbol: SymbolString,
    pub status: SlotStatus,
    /// Epoch seconds of the last successful fetch, 0 = never.
    pub last_success_epoch: u64,
    /// Epoch seconds until which fetches are skipped, 0 = none.
    pub cooldown_until: u64,
}

impl SymbolSlot {
    pub const fn empty() -> Self {
        Self {
            symbol: String::new(),
            status: SlotStatus::NeverAttempted,
            last_success_epoch: 0,
            cooldown_until: 0,
        }
    }

    /// Build a slot for a configured symbol, truncating silently if the
    /// configured string somehow exceeds the slot width.
    pub fn for_symbol(symbol: &str) -> Self {
        let mut slot = Self::empty();
        let take = symbol.len().min(SYMBOL_MAX_BYTES);
        let _ = slot.symbol.push_str(&symbol[..take]);
        slot
    }

    pub fn is_active(&self) -> bool {
        !self.symbol.is_empty()
    }

    pub fn in_cooldown(&self, now: u64) -> bool {
        now < self.cooldown_until
    }
}

/// Transient per-fetch retry state. Lives only for the duration of one
/// pipeline run over one symbol; the persisted part of the policy is the
/// slot's `cooldown_until`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchPolicy {
    Idle,
    Attempting { attempt: u8 },
    Cooldown { until: u64 },
}

impl FetchPolicy {
    /// Start the next attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u8 {
        let next = match *self {
            Self::Attempting { attempt } => attempt.saturating_add(1),
            _ => 1,
        };
        *self = Self::Attempting { attempt: next };
        next
    }

    /// Attempts exhausted: enter cooldown until `now + cooldown_secs`.
    pub fn exhaust(&mut self, now: u64, cooldown_secs: u64) -> u64 {
        let until = now.saturating_add(cooldown_secs);
        *self = Self::Cooldown { until };
        until
    }

    pub fn settle(&mut self) {
        *self = Self::Idle;
    }
}
