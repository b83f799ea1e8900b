use log::info;
use tickerboard_core::render::{BoardView, Freshness, PanelRenderer, RenderError};
use tickerboard_core::series::Trend;

/// Serial-log renderer standing in for the panel driver during bring-up.
pub(super) struct LogPanel;

impl LogPanel {
    pub(super) const fn new() -> Self {
        Self
    }
}

impl PanelRenderer for LogPanel {
    fn render(&mut self, view: &BoardView<'_>) -> Result<(), RenderError> {
        for panel in &view.panels {
            let trend = match panel.summary.trend {
                Trend::Rising => "+",
                Trend::Falling => "-",
                Trend::Flat => "=",
            };
            let freshness = match panel.freshness {
                Freshness::Fresh => "fresh",
                Freshness::Cached => "cached",
            };
            info!(
                "panel {}: latest={:.2}{} min={:.2} max={:.2} points={} ({})",
                panel.symbol,
                panel.summary.latest,
                trend,
                panel.summary.min,
                panel.summary.max,
                panel.month.len(),
                freshness
            );
        }
        for event in view.history.iter() {
            info!(
                "panel history: epoch={} outcome={:?} battery={} mV",
                event.epoch, event.outcome, event.battery_mv
            );
        }
        info!(
            "panel status: battery={} mV clock_synced={}",
            view.battery_mv, view.clock_synced
        );
        Ok(())
    }
}
