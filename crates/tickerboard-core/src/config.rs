//! Build-time firmware configuration.

/// Configured symbol slots; empty entries are inactive.
pub const MAX_STOCKS: usize = 4;
/// One trading month of daily closes.
pub const MONTH_DATA_POINTS: usize = 22;
/// One trading year of daily closes.
pub const YEAR_DATA_POINTS: usize = 252;
/// Wake outcomes kept for diagnostics and the battery trend strip.
pub const WAKEUP_HISTORY_SIZE: usize = 5;
/// Ticker symbols are short; 8 bytes covers every US listing.
pub const SYMBOL_MAX_BYTES: usize = 8;
/// Seed for the running-minimum scan in the series reducer.
pub const INITIAL_MIN_PRICE: f32 = 99_999.0;

pub const WIFI_TIMEOUT_MS: u32 = 20_000;
pub const WIFI_RETRY_DELAY_MS: u32 = 30_000;
pub const NTP_SYNC_MAX_ATTEMPTS: u8 = 15;
pub const NTP_SYNC_RETRY_INTERVAL_MS: u32 = 1_000;
pub const QUOTE_MAX_ATTEMPTS: u8 = 2;
pub const QUOTE_RETRY_DELAY_MS: u32 = 15_000;
pub const QUOTE_FAILURE_COOLDOWN_SECS: u64 = 6 * 60 * 60;
pub const QUOTE_HTTP_TIMEOUT_MS: u32 = 10_000;

/// Packs below this are protected by skipping the network entirely.
pub const LOW_BATTERY_THRESHOLD_MV: u16 = 3_400;
/// Readings below this are a sensor fault, not a drained pack.
pub const MIN_VALID_BATTERY_MV: u16 = 100;
pub const LOW_BATTERY_SLEEP_SECS: u64 = 24 * 60 * 60;
/// Guard floor so a stale clock can never produce a near-zero sleep.
pub const MIN_SLEEP_SECS: u64 = 60;

/// Everything the firmware needs to know at build time. One instance is
/// constructed in the binary and threaded through the wake cycle; there is
/// no runtime reconfiguration surface.
#[derive(Clone, Copy, Debug)]
pub struct FirmwareConfig {
    pub api_key: &'static str,
    pub quote_base_url: &'static str,
    pub ntp_server: &'static str,
    pub symbols: [&'static str; MAX_STOCKS],
    /// Local wall-clock time of the daily refresh.
    pub update_hour: u8,
    pub update_minute: u8,
    pub gmt_offset_secs: i32,
    pub dst_offset_secs: i32,
    pub wifi_timeout_ms: u32,
    pub wifi_retry_delay_ms: u32,
    pub ntp_max_attempts: u8,
    pub ntp_retry_interval_ms: u32,
    pub quote_max_attempts: u8,
    pub quote_retry_delay_ms: u32,
    pub quote_cooldown_secs: u64,
    pub quote_http_timeout_ms: u32,
    pub low_battery_threshold_mv: u16,
    pub min_valid_battery_mv: u16,
    pub low_battery_sleep_secs: u64,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            api_key: "",
            quote_base_url: "http://www.alphavantage.co/query",
            ntp_server: "pool.ntp.org",
            symbols: [""; MAX_STOCKS],
            update_hour: 19,
            update_minute: 0,
            // Eastern Time.
            gmt_offset_secs: -18_000,
            dst_offset_secs: 3_600,
            wifi_timeout_ms: WIFI_TIMEOUT_MS,
            wifi_retry_delay_ms: WIFI_RETRY_DELAY_MS,
            ntp_max_attempts: NTP_SYNC_MAX_ATTEMPTS,
            ntp_retry_interval_ms: NTP_SYNC_RETRY_INTERVAL_MS,
            quote_max_attempts: QUOTE_MAX_ATTEMPTS,
            quote_retry_delay_ms: QUOTE_RETRY_DELAY_MS,
            quote_cooldown_secs: QUOTE_FAILURE_COOLDOWN_SECS,
            quote_http_timeout_ms: QUOTE_HTTP_TIMEOUT_MS,
            low_battery_threshold_mv: LOW_BATTERY_THRESHOLD_MV,
            min_valid_battery_mv: MIN_VALID_BATTERY_MV,
            low_battery_sleep_secs: LOW_BATTERY_SLEEP_SECS,
        }
    }
}

impl FirmwareConfig {
    pub fn utc_offset_secs(&self) -> i32 {
        self.gmt_offset_secs + self.dst_offset_secs
    }

    pub fn active_symbols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.symbols.iter().copied().filter(|s| !s.is_empty())
    }

    pub fn active_symbol_count(&self) -> usize {
        self.active_symbols().count()
    }

    /// Worst-case wall-clock duration of one wake cycle: every bounded wait
    /// at its configured maximum. The cycle structure contains no other
    /// suspension points, so this sum is the hard upper bound checked
    /// against the wake interval.
    pub fn worst_case_cycle_ms(&self) -> u64 {
        let connect = 2 * self.wifi_timeout_ms as u64 + self.wifi_retry_delay_ms as u64;
        let sync = self.ntp_max_attempts as u64 * self.ntp_retry_interval_ms as u64;
        let per_symbol = self.quote_max_attempts as u64
            * (self.quote_http_timeout_ms as u64 + self.quote_retry_delay_ms as u64);
        connect + sync + self.active_symbol_count() as u64 * per_symbol
    }
}
