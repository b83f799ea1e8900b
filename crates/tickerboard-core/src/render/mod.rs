//! Chart-ready view models handed to the external panel renderer.

pub mod mock;

use heapless::Vec;

use crate::config::{MAX_STOCKS, MONTH_DATA_POINTS};
use crate::history::WakeupHistory;
use crate::series::{PriceSeries, SeriesSummary};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Freshness {
    /// Fetched this cycle.
    Fresh,
    /// Served from the persisted window (cooldown skip or fetch failure).
    Cached,
}

/// One symbol's panel: the month window plus its reduction.
#[derive(Clone, Copy, Debug)]
pub struct SymbolPanel<'a> {
    pub symbol: &'a str,
    pub month: &'a PriceSeries<MONTH_DATA_POINTS>,
    pub summary: SeriesSummary,
    pub freshness: Freshness,
}

/// Everything the panel shows for one wake cycle.
#[derive(Clone, Debug)]
pub struct BoardView<'a> {
    pub panels: Vec<SymbolPanel<'a>, MAX_STOCKS>,
    pub history: &'a WakeupHistory,
    pub battery_mv: u16,
    pub clock_synced: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderError {
    Panel,
}

/// External rendering collaborator. Both outcomes are non-fatal to the
/// wake cycle; a failed paint only costs one refresh.
pub trait PanelRenderer {
    fn render(&mut self, view: &BoardView<'_>) -> Result<(), RenderError>;
}
