//! Wake-cycle orchestrator.
//!
//! Drives one boot -> connect -> sync -> fetch -> reduce -> render ->
//! persist-and-sleep pass over the collaborator seams. Every wait inside
//! the sequence is bounded by configuration, each component failure is
//! absorbed into a per-step outcome, and every path ends by returning a
//! [`SleepPlan`] — the binary's only job afterwards is to enter deep
//! sleep with it.

#[cfg(test)]
mod tests;

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, info, warn};

use crate::battery::{self, BatteryAssessment};
use crate::calendar;
use crate::config::{FirmwareConfig, MAX_STOCKS, MIN_SLEEP_SECS};
use crate::fetch::{self, QuoteTransport, SlotFetchOutcome};
use crate::history::{WakeOutcome, WakeupEvent};
use crate::persist::{PersistedState, StateStore};
use crate::render::{BoardView, Freshness, PanelRenderer, SymbolPanel};
use crate::series;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectOutcome {
    Connected,
    TimedOut,
    AuthFailed,
}

/// Network link collaborator. `connect` must resolve within `timeout_ms`;
/// the radio stays powered until `power_off`, which the orchestrator
/// guarantees to call on every path that powered it on.
#[allow(async_fn_in_trait)]
pub trait Connectivity {
    async fn connect(&mut self, timeout_ms: u32) -> ConnectOutcome;
    async fn power_off(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Synced(u64),
    Unsynced,
}

/// Wall-clock source. `Unsynced` is a degraded state, never an abort.
#[allow(async_fn_in_trait)]
pub trait TimeSync {
    async fn sync(&mut self, max_attempts: u8, retry_interval_ms: u32) -> SyncOutcome;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CycleState {
    Boot,
    ConnectNetwork,
    SyncTime,
    FetchAll,
    Reduce,
    Render,
    PersistAndSleep,
}

impl CycleState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::ConnectNetwork => "connect-network",
            Self::SyncTime => "sync-time",
            Self::FetchAll => "fetch-all",
            Self::Reduce => "reduce",
            Self::Render => "render",
            Self::PersistAndSleep => "persist-and-sleep",
        }
    }
}

fn enter(state: CycleState) {
    info!("cycle: {}", state.as_str());
}

/// What the binary hands to the deep-sleep collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SleepPlan {
    pub sleep_secs: u64,
    pub wake_epoch: u64,
    pub outcome: WakeOutcome,
    /// Set when the cycle ran on the persisted clock; the wake instant
    /// may drift until the next successful sync.
    pub best_effort_schedule: bool,
}

/// One wake cycle over the collaborator set. Constructed, run once,
/// consumed.
pub struct WakeCycle<'a, C, T, Q, R, S, D> {
    config: &'a FirmwareConfig,
    link: C,
    time_sync: T,
    transport: Q,
    renderer: R,
    store: S,
    delay: D,
    /// Response scratch shared by every fetch; sized by the caller to
    /// [`fetch::QUOTE_BODY_MAX_BYTES`].
    body: &'a mut [u8],
}

impl<'a, C, T, Q, R, S, D> WakeCycle<'a, C, T, Q, R, S, D>
where
    C: Connectivity,
    T: TimeSync,
    Q: QuoteTransport,
    R: PanelRenderer,
    S: StateStore,
    D: DelayNs,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a FirmwareConfig,
        link: C,
        time_sync: T,
        transport: Q,
        renderer: R,
        store: S,
        delay: D,
        body: &'a mut [u8],
    ) -> Self {
        Self {
            config,
            link,
            time_sync,
            transport,
            renderer,
            store,
            delay,
            body,
        }
    }

    pub async fn run(mut self, battery_mv: u16) -> SleepPlan {
        enter(CycleState::Boot);
        let mut state = match self.store.load() {
            Ok(Some(state)) => {
                info!("state restored, last_epoch={}", state.last_epoch);
                state
            }
            Ok(None) => {
                info!("no usable persisted state; cold start");
                PersistedState::cold_start(self.config)
            }
            Err(_) => {
                warn!("state backend unreadable; cold start");
                PersistedState::cold_start(self.config)
            }
        };
        state.adopt_symbols(self.config);

        // Best-known clock until sync improves it.
        let mut now = state.last_epoch;

        match battery::assess(
            battery_mv,
            self.config.low_battery_threshold_mv,
            self.config.min_valid_battery_mv,
        ) {
            BatteryAssessment::Low => {
                warn!("battery low ({} mV); skipping network work", battery_mv);
                return self
                    .persist_and_sleep(&mut state, now, WakeOutcome::BatteryLow, battery_mv, false)
                    .await;
            }
            BatteryAssessment::Implausible => {
                warn!("battery reading {} mV implausible; ignoring sensor", battery_mv);
            }
            BatteryAssessment::Ok => {}
        }

        enter(CycleState::ConnectNetwork);
        let mut connected = false;
        match self.link.connect(self.config.wifi_timeout_ms).await {
            ConnectOutcome::Connected => connected = true,
            ConnectOutcome::AuthFailed => {
                warn!("network credentials rejected; no fetch this cycle");
            }
            ConnectOutcome::TimedOut => {
                info!(
                    "network timed out; retrying once in {} ms",
                    self.config.wifi_retry_delay_ms
                );
                self.delay.delay_ms(self.config.wifi_retry_delay_ms).await;
                match self.link.connect(self.config.wifi_timeout_ms).await {
                    ConnectOutcome::Connected => connected = true,
                    other => warn!("network unavailable after retry: {:?}", other),
                }
            }
        }

        if !connected {
            self.link.power_off().await;
            return self
                .persist_and_sleep(&mut state, now, WakeOutcome::TotalFailure, battery_mv, false)
                .await;
        }

        enter(CycleState::SyncTime);
        let clock_synced = match self
            .time_sync
            .sync(self.config.ntp_max_attempts, self.config.ntp_retry_interval_ms)
            .await
        {
            SyncOutcome::Synced(epoch) => {
                info!("clock synced: {}", epoch);
                now = epoch;
                true
            }
            SyncOutcome::Unsynced => {
                warn!("time sync exhausted; continuing on persisted clock {}", now);
                false
            }
        };

        enter(CycleState::FetchAll);
        let mut outcomes: [Option<SlotFetchOutcome>; MAX_STOCKS] = [None; MAX_STOCKS];
        for index in 0..MAX_STOCKS {
            let record = &mut state.slots[index];
            if !record.slot.is_active() {
                continue;
            }
            let outcome = fetch::fetch_symbol(
                self.config,
                &mut record.slot,
                &mut record.series,
                now,
                &mut self.transport,
                &mut self.delay,
                &mut *self.body,
            )
            .await;
            outcomes[index] = Some(outcome);
        }

        // Network work is done on every remaining path.
        self.link.power_off().await;

        enter(CycleState::Reduce);
        let mut panels: Vec<SymbolPanel<'_>, MAX_STOCKS> = Vec::new();
        for (record, outcome) in state.slots.iter().zip(outcomes.iter()) {
            if !record.slot.is_active() || !record.series.has_data() {
                continue;
            }
            let Some(summary) = series::reduce(&record.series.month) else {
                continue;
            };
            let freshness = match outcome {
                Some(SlotFetchOutcome::Fresh(_)) => Freshness::Fresh,
                _ => Freshness::Cached,
            };
            debug!(
                "reduce {}: min={} max={} latest={}",
                record.slot.symbol.as_str(),
                summary.min,
                summary.max,
                summary.latest
            );
            let _ = panels.push(SymbolPanel {
                symbol: record.slot.symbol.as_str(),
                month: &record.series.month,
                summary,
                freshness,
            });
        }

        enter(CycleState::Render);
        let view = BoardView {
            panels,
            history: &state.history,
            battery_mv,
            clock_synced,
        };
        if let Err(err) = self.renderer.render(&view) {
            // Display is best-effort; a failed paint costs one refresh.
            warn!("panel render failed: {:?}", err);
        }
        // Release the borrow of `state` held by `view`/`panels` before we need
        // `&mut state` below.
        drop(view);

        let outcome = cycle_outcome(&state, &outcomes);
        self.persist_and_sleep(&mut state, now, outcome, battery_mv, clock_synced)
            .await
    }

    async fn persist_and_sleep(
        &mut self,
        state: &mut PersistedState,
        now: u64,
        outcome: WakeOutcome,
        battery_mv: u16,
        clock_synced: bool,
    ) -> SleepPlan {
        enter(CycleState::PersistAndSleep);
        state.history.push(WakeupEvent {
            epoch: now,
            outcome,
            battery_mv,
        });
        state.last_epoch = now;

        match self.store.save(state) {
            Ok(()) => info!("state committed"),
            // Sleep regardless; losing one commit only costs cache.
            Err(_) => warn!("state commit failed"),
        }

        let (sleep_secs, wake_epoch) = if outcome == WakeOutcome::BatteryLow {
            let secs = self.config.low_battery_sleep_secs;
            (secs, now.saturating_add(secs))
        } else {
            let next = calendar::next_update_epoch(
                now,
                self.config.update_hour,
                self.config.update_minute,
                self.config.utc_offset_secs(),
            );
            let secs = next.saturating_sub(now).max(MIN_SLEEP_SECS);
            (secs, now.saturating_add(secs))
        };

        info!(
            "cycle done: outcome={:?} sleep_secs={} wake_epoch={}",
            outcome, sleep_secs, wake_epoch
        );
        SleepPlan {
            sleep_secs,
            wake_epoch,
            outcome,
            best_effort_schedule: !clock_synced,
        }
    }
}

/// Aggregate the per-slot results into the cycle's history tag.
/// A cooldown skip counts as success only when there is cached data to
/// show; a failed slot that still has an older window to display keeps
/// the cycle at partial rather than total failure.
fn cycle_outcome(state: &PersistedState, outcomes: &[Option<SlotFetchOutcome>]) -> WakeOutcome {
    let mut active = 0usize;
    let mut succeeded = 0usize;
    let mut showable_failures = 0usize;

    for (record, outcome) in state.slots.iter().zip(outcomes.iter()) {
        if !record.slot.is_active() {
            continue;
        }
        active += 1;
        match outcome {
            Some(SlotFetchOutcome::Fresh(_)) => succeeded += 1,
            Some(SlotFetchOutcome::CachedByCooldown) if record.series.has_data() => succeeded += 1,
            _ => {
                if record.series.has_data() {
                    showable_failures += 1;
                }
            }
        }
    }

    if active == 0 || succeeded == active {
        WakeOutcome::Success
    } else if succeeded > 0 || showable_failures > 0 {
        WakeOutcome::PartialFailure
    } else {
        WakeOutcome::TotalFailure
    }
}
