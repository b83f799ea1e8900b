use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;

use super::*;
use crate::config::{FirmwareConfig, LOW_BATTERY_SLEEP_SECS};
use crate::fetch::{QuoteTransport, TransportError};
use crate::history::WakeOutcome;
use crate::persist::{PersistedState, StateStore};
use crate::render::mock::NullRenderer;
use crate::render::{BoardView, PanelRenderer, RenderError};
use crate::series::PricePoint;

const NOW: u64 = 1_700_000_000;

struct ScriptedLink<'a> {
    script: &'a [ConnectOutcome],
    connect_calls: usize,
    power_off_calls: usize,
}

impl<'a> ScriptedLink<'a> {
    fn new(script: &'a [ConnectOutcome]) -> Self {
        Self {
            script,
            connect_calls: 0,
            power_off_calls: 0,
        }
    }
}

impl Connectivity for &mut ScriptedLink<'_> {
    async fn connect(&mut self, _timeout_ms: u32) -> ConnectOutcome {
        let outcome = self
            .script
            .get(self.connect_calls)
            .copied()
            .unwrap_or(ConnectOutcome::TimedOut);
        self.connect_calls += 1;
        outcome
    }

    async fn power_off(&mut self) {
        self.power_off_calls += 1;
    }
}

struct FixedTimeSync(SyncOutcome);

impl TimeSync for FixedTimeSync {
    async fn sync(&mut self, _max_attempts: u8, _retry_interval_ms: u32) -> SyncOutcome {
        self.0
    }
}

struct CountingTransport<'a> {
    responses: &'a [Result<&'a [u8], TransportError>],
    calls: usize,
}

impl<'a> CountingTransport<'a> {
    fn new(responses: &'a [Result<&'a [u8], TransportError>]) -> Self {
        Self { responses, calls: 0 }
    }
}

impl QuoteTransport for &mut CountingTransport<'_> {
    async fn get(&mut self, _url: &str, body: &mut [u8]) -> Result<usize, TransportError> {
        let step = self
            .responses
            .get(self.calls)
            .copied()
            .unwrap_or(Err(TransportError::Io));
        self.calls += 1;
        match step {
            Ok(payload) => {
                body[..payload.len()].copy_from_slice(payload);
                Ok(payload.len())
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Default)]
struct MemoryStore {
    contents: Option<PersistedState>,
    save_count: usize,
    fail_load: bool,
}

impl StateStore for &mut MemoryStore {
    type Error = ();

    fn load(&mut self) -> Result<Option<PersistedState>, ()> {
        if self.fail_load {
            Err(())
        } else {
            Ok(self.contents.clone())
        }
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), ()> {
        self.contents = Some(state.clone());
        self.save_count += 1;
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, _ms: u32) {}
}

struct FailingRenderer;

impl PanelRenderer for FailingRenderer {
    fn render(&mut self, _view: &BoardView<'_>) -> Result<(), RenderError> {
        Err(RenderError::Panel)
    }
}

fn spy_config() -> FirmwareConfig {
    FirmwareConfig {
        api_key: "demo",
        symbols: ["SPY", "", "", ""],
        ..FirmwareConfig::default()
    }
}

/// Daily payload with `count` consecutive January 2024 sessions starting
/// at `base_price`, newest first as the service sends it.
fn january_payload(count: u32, base_price: f32) -> std::string::String {
    let mut body =
        std::string::String::from("{ \"Meta Data\": {}, \"Time Series (Daily)\": {");
    for offset in (0..count).rev() {
        body.push_str(&format!(
            "\"2024-01-{:02}\": {{\"4. close\": \"{:.2}\"}},",
            offset + 1,
            base_price + offset as f32
        ));
    }
    body.pop(); // trailing comma
    body.push_str("} }");
    body
}

fn run(
    config: &FirmwareConfig,
    link: &mut ScriptedLink<'_>,
    sync: SyncOutcome,
    transport: &mut CountingTransport<'_>,
    store: &mut MemoryStore,
    battery_mv: u16,
) -> SleepPlan {
    let mut body = [0u8; 4096];
    let cycle = WakeCycle::new(
        config,
        link,
        FixedTimeSync(sync),
        transport,
        NullRenderer::new(),
        store,
        NoDelay,
        &mut body,
    );
    block_on(cycle.run(battery_mv))
}

#[test]
fn successful_single_symbol_cycle() {
    let config = spy_config();
    let payload = january_payload(22, 400.0);
    let responses = [Ok(payload.as_bytes())];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert!(!plan.best_effort_schedule);
    assert_eq!(transport.calls, 1);
    assert_eq!(link.power_off_calls, 1);
    assert_eq!(store.save_count, 1);

    let saved = store.contents.as_ref().unwrap();
    assert_eq!(saved.slots[0].series.month.len(), 22);
    let summary = crate::series::reduce(&saved.slots[0].series.month).unwrap();
    assert_eq!(summary.min, 400.0);
    assert_eq!(summary.max, 421.0);
    assert_eq!(summary.latest, 421.0);

    assert_eq!(saved.history.len(), 1);
    let event = saved.history.latest().unwrap();
    assert_eq!(event.outcome, WakeOutcome::Success);
    assert_eq!(event.battery_mv, 3_900);
    assert_eq!(event.epoch, NOW);

    let expected_wake = crate::calendar::next_update_epoch(
        NOW,
        config.update_hour,
        config.update_minute,
        config.utc_offset_secs(),
    );
    assert_eq!(plan.wake_epoch, expected_wake);
    assert!(plan.wake_epoch > NOW);
}

#[test]
fn battery_low_short_circuits_all_network_work() {
    let config = spy_config();
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&[]);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_000,
    );

    assert_eq!(plan.outcome, WakeOutcome::BatteryLow);
    assert_eq!(plan.sleep_secs, LOW_BATTERY_SLEEP_SECS);
    assert_eq!(link.connect_calls, 0);
    assert_eq!(transport.calls, 0);

    let saved = store.contents.as_ref().unwrap();
    assert_eq!(saved.history.latest().unwrap().outcome, WakeOutcome::BatteryLow);
}

#[test]
fn implausible_battery_reading_does_not_trip_protection() {
    let config = spy_config();
    let payload = january_payload(5, 400.0);
    let responses = [Ok(payload.as_bytes())];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore::default();

    // 50 mV is far below the plausible sensor floor.
    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        50,
    );

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert_eq!(link.connect_calls, 1);
}

#[test]
fn connect_failure_is_total_failure_with_no_fetch() {
    let config = spy_config();
    let mut link = ScriptedLink::new(&[ConnectOutcome::TimedOut, ConnectOutcome::TimedOut]);
    let mut transport = CountingTransport::new(&[]);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::TotalFailure);
    assert_eq!(link.connect_calls, 2);
    assert_eq!(link.power_off_calls, 1);
    assert_eq!(transport.calls, 0);
    assert_eq!(store.save_count, 1);
    // The daily schedule still drives the next wake.
    assert!(plan.sleep_secs >= crate::config::MIN_SLEEP_SECS);
    assert!(plan.wake_epoch > store.contents.as_ref().unwrap().last_epoch);
}

#[test]
fn auth_rejection_is_terminal_without_retry() {
    let config = spy_config();
    let mut link = ScriptedLink::new(&[ConnectOutcome::AuthFailed]);
    let mut transport = CountingTransport::new(&[]);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::TotalFailure);
    assert_eq!(link.connect_calls, 1);
    assert_eq!(link.power_off_calls, 1);
}

#[test]
fn exhausted_fetch_without_cache_is_total_failure() {
    let config = spy_config();
    let responses = [Err(TransportError::Io), Err(TransportError::Io)];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::TotalFailure);
    assert_eq!(transport.calls, config.quote_max_attempts as usize);

    let saved = store.contents.as_ref().unwrap();
    assert_eq!(
        saved.slots[0].slot.cooldown_until,
        NOW + config.quote_cooldown_secs
    );
}

#[test]
fn exhausted_fetch_with_cache_is_partial_failure_and_keeps_cache() {
    let config = spy_config();
    let mut seeded = PersistedState::cold_start(&config);
    seeded.last_epoch = NOW - 86_400;
    seeded.slots[0].series.merge(&[PricePoint { day: 19_000, close: 350.0 }]);
    let responses = [Err(TransportError::Io), Err(TransportError::Io)];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore {
        contents: Some(seeded),
        ..MemoryStore::default()
    };

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::PartialFailure);
    let saved = store.contents.as_ref().unwrap();
    assert_eq!(saved.slots[0].series.month.len(), 1);
    assert_eq!(
        saved.slots[0].series.month.newest(),
        Some(PricePoint { day: 19_000, close: 350.0 })
    );
}

#[test]
fn open_cooldown_reuses_cache_with_zero_network_calls() {
    let config = spy_config();
    let mut seeded = PersistedState::cold_start(&config);
    seeded.last_epoch = NOW - 3_600;
    seeded.slots[0].series.merge(&[PricePoint { day: 19_000, close: 350.0 }]);
    seeded.slots[0].slot.cooldown_until = NOW + 600;
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&[]);
    let mut store = MemoryStore {
        contents: Some(seeded),
        ..MemoryStore::default()
    };

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert_eq!(transport.calls, 0);
}

#[test]
fn no_configured_symbols_is_a_vacuous_success() {
    let config = FirmwareConfig {
        symbols: ["", "", "", ""],
        ..spy_config()
    };
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&[]);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert_eq!(transport.calls, 0);
}

#[test]
fn unsynced_clock_degrades_to_persisted_epoch() {
    let config = spy_config();
    let last_epoch = NOW - 7 * 86_400;
    let mut seeded = PersistedState::cold_start(&config);
    seeded.last_epoch = last_epoch;
    let payload = january_payload(3, 400.0);
    let responses = [Ok(payload.as_bytes())];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore {
        contents: Some(seeded),
        ..MemoryStore::default()
    };

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Unsynced,
        &mut transport,
        &mut store,
        3_900,
    );

    assert!(plan.best_effort_schedule);
    assert_eq!(plan.outcome, WakeOutcome::Success);
    // Scheduling falls back to the stale clock rather than aborting.
    let expected_wake = crate::calendar::next_update_epoch(
        last_epoch,
        config.update_hour,
        config.update_minute,
        config.utc_offset_secs(),
    );
    assert_eq!(plan.wake_epoch, expected_wake);
    assert_eq!(store.contents.as_ref().unwrap().history.latest().unwrap().epoch, last_epoch);
}

#[test]
fn unreadable_store_cold_starts_and_still_sleeps() {
    let config = spy_config();
    let payload = january_payload(3, 400.0);
    let responses = [Ok(payload.as_bytes())];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore {
        fail_load: true,
        ..MemoryStore::default()
    };

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert_eq!(store.save_count, 1);
}

#[test]
fn renderer_failure_is_not_fatal() {
    let config = spy_config();
    let payload = january_payload(3, 400.0);
    let responses: [Result<&[u8], TransportError>; 1] = [Ok(payload.as_bytes())];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore::default();
    let mut body = [0u8; 4096];

    let cycle = WakeCycle::new(
        &config,
        &mut link,
        FixedTimeSync(SyncOutcome::Synced(NOW)),
        &mut transport,
        FailingRenderer,
        &mut store,
        NoDelay,
        &mut body,
    );
    let plan = block_on(cycle.run(3_900));

    assert_eq!(plan.outcome, WakeOutcome::Success);
    assert_eq!(store.save_count, 1);
}

#[test]
fn mixed_slot_results_are_partial_failure() {
    let config = FirmwareConfig {
        symbols: ["SPY", "QQQ", "", ""],
        ..spy_config()
    };
    let payload = january_payload(3, 400.0);
    // SPY succeeds first try; QQQ burns both attempts.
    let responses = [
        Ok(payload.as_bytes()),
        Err(TransportError::Io),
        Err(TransportError::Io),
    ];
    let mut link = ScriptedLink::new(&[ConnectOutcome::Connected]);
    let mut transport = CountingTransport::new(&responses);
    let mut store = MemoryStore::default();

    let plan = run(
        &config,
        &mut link,
        SyncOutcome::Synced(NOW),
        &mut transport,
        &mut store,
        3_900,
    );

    assert_eq!(plan.outcome, WakeOutcome::PartialFailure);
    assert_eq!(transport.calls, 3);
    let saved = store.contents.as_ref().unwrap();
    assert!(saved.slots[0].series.has_data());
    assert_eq!(saved.slots[1].slot.cooldown_until, NOW + config.quote_cooldown_secs);
}
