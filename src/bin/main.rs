#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::{Delay, Timer};
use esp_hal::{
    clock::CpuClock,
    rtc_cntl::{SocResetReason, reset_reason, wakeup_cause},
    system::Cpu,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;
use tickerboard_core::{
    config::{FirmwareConfig, MAX_STOCKS},
    cycle::WakeCycle,
    fetch::QUOTE_BODY_MAX_BYTES,
    persist::STATE_RECORD_MAX_BYTES,
};
use tickerboard_hal_esp32s3::{
    battery::BatterySense,
    network::{WifiConfig, WifiLink, http::HttpTransport, sntp::SntpClient},
    storage::flash_state::FlashStateStore,
};

use panel::LogPanel;

#[path = "main/panel.rs"]
mod panel;
#[path = "main/power.rs"]
mod power;

const WIFI_SSID: &str = env!(
    "TICKERBOARD_WIFI_SSID",
    "Set TICKERBOARD_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "TICKERBOARD_WIFI_PASSWORD",
    "Set TICKERBOARD_WIFI_PASSWORD in your environment before building/flashing."
);
const QUOTE_API_KEY: &str = env!(
    "TICKERBOARD_API_KEY",
    "Set TICKERBOARD_API_KEY in your environment before building/flashing."
);
const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);

/// Watchlist; empty entries are skipped.
const SYMBOLS: [&str; MAX_STOCKS] = ["SPY", "", "", ""];

/// Sleep applied when the cycle cannot even be constructed; the next wake
/// retries from scratch.
const FAILSAFE_SLEEP_SECS: u64 = 60 * 60;
/// Lets the last log lines drain before the rails drop.
const SLEEP_NOTICE_MS: u64 = 120;

static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static STATE_SCRATCH: StaticCell<[u8; STATE_RECORD_MAX_BYTES]> = StaticCell::new();
static QUOTE_BODY: StaticCell<[u8; QUOTE_BODY_MAX_BYTES]> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

async fn failsafe_sleep() -> ! {
    warn!("failsafe: sleeping {}s", FAILSAFE_SLEEP_SECS);
    Timer::after_millis(SLEEP_NOTICE_MS).await;
    power::enter_deep_sleep(FAILSAFE_SLEEP_SECS);
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: tickerboard starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let boot_reset_reason = reset_reason(Cpu::ProCpu);
    let boot_wakeup_cause = wakeup_cause();
    let woke_from_deep_sleep = boot_reset_reason == Some(SocResetReason::CoreDeepSleep);
    info!(
        "boot reset_reason={:?} wakeup_cause={:?} deep_sleep_wake={}",
        boot_reset_reason, boot_wakeup_cause, woke_from_deep_sleep
    );

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let firmware = FirmwareConfig {
        api_key: QUOTE_API_KEY,
        symbols: SYMBOLS,
        ..FirmwareConfig::default()
    };
    info!(
        "watchlist: {} active symbols, update {:02}:{:02} local, worst-case cycle {} ms",
        firmware.active_symbol_count(),
        firmware.update_hour,
        firmware.update_minute,
        firmware.worst_case_cycle_ms()
    );

    // Battery first: a drained pack must skip radio bring-up entirely, so
    // the reading happens before esp-radio powers anything.
    // Battery divider wiring used by this board: sense on GPIO4 (ADC1).
    let mut battery = BatterySense::new(peripherals.ADC1, peripherals.GPIO4);
    let battery_mv = battery.read_millivolts();
    info!("battery: {} mV", battery_mv);

    let state_scratch = STATE_SCRATCH.init([0u8; STATE_RECORD_MAX_BYTES]);
    let store = match FlashStateStore::new(state_scratch) {
        Ok(store) => store,
        Err(err) => {
            // Without durable state there is nothing useful to do awake.
            warn!("state store unavailable: {:?}", err);
            failsafe_sleep().await
        }
    };

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            warn!("esp-radio init failed: {:?}", err);
            failsafe_sleep().await
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("wifi peripheral init failed: {:?}", err);
                failsafe_sleep().await
            }
        };

    let client_config = ClientConfig::default()
        .with_ssid(WIFI_CONFIG.ssid.into())
        .with_password(WIFI_CONFIG.password.into());
    if let Err(err) = wifi_controller.set_config(&ModeConfig::Client(client_config)) {
        warn!("wifi mode config failed: {:?}", err);
        failsafe_sleep().await
    }

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x7E11_C0DE_5EED_2B01,
    );

    let link = WifiLink::new(wifi_controller, stack);
    let time_sync = SntpClient::new(stack, firmware.ntp_server);
    let transport = HttpTransport::new(stack, firmware.quote_http_timeout_ms);
    let body = QUOTE_BODY.init([0u8; QUOTE_BODY_MAX_BYTES]);

    let cycle = WakeCycle::new(
        &firmware,
        link,
        time_sync,
        transport,
        LogPanel::new(),
        store,
        Delay,
        &mut body[..],
    );

    // The net runner must keep polling while the cycle works; the cycle
    // finishing is the only way out of the select.
    let plan = match select(net_runner.run(), cycle.run(battery_mv)).await {
        Either::First(_) => unreachable!("net runner never returns"),
        Either::Second(plan) => plan,
    };

    info!(
        "sleep: {}s until epoch {} (outcome {:?}{})",
        plan.sleep_secs,
        plan.wake_epoch,
        plan.outcome,
        if plan.best_effort_schedule {
            ", best-effort schedule"
        } else {
            ""
        }
    );
    Timer::after_millis(SLEEP_NOTICE_MS).await;
    power::enter_deep_sleep(plan.sleep_secs);
}
