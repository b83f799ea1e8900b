//! Per-symbol quote fetch pipeline: cooldown circuit breaker, attempt-
//! limited retry with fixed spacing, payload parse/validate, and the merge
//! into the symbol's price windows. Failure is always per-slot; one
//! exhausted symbol never delays the others.

mod parse;

pub use parse::{parse_daily_series, ParseError};

use core::fmt::Write as _;

use embedded_hal_async::delay::DelayNs;
use heapless::{String, Vec};
use log::{debug, info, warn};

use crate::config::FirmwareConfig;
use crate::series::{MergeStats, PricePoint, SymbolSeries};
use crate::slot::{FetchPolicy, SlotStatus, SymbolSlot};

/// Base URL + function + symbol + API key with headroom.
pub const QUOTE_URL_MAX_BYTES: usize = 192;
/// A compact daily payload is ~8 KiB; leave room for headers' worth of slack.
pub const QUOTE_BODY_MAX_BYTES: usize = 12 * 1024;
/// Compact daily payloads carry 100 points.
pub const QUOTE_PARSE_MAX_POINTS: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportError {
    BadUrl,
    Dns,
    Connect,
    Io,
    Timeout,
    /// Non-2xx response. Rate limiting lands here too and is absorbed by
    /// the same cooldown policy.
    Status(u16),
}

/// External HTTP transport. `Ok(len)` only for a 2xx response whose body
/// fits `body`; everything else is one failed attempt.
#[allow(async_fn_in_trait)]
pub trait QuoteTransport {
    async fn get(&mut self, url: &str, body: &mut [u8]) -> Result<usize, TransportError>;
}

/// Result of running the pipeline for one active slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotFetchOutcome {
    /// New points merged this cycle.
    Fresh(MergeStats),
    /// Cooldown window still open; cached windows reused, no network call.
    CachedByCooldown,
    /// Attempts exhausted; cooldown armed, cached windows left untouched.
    Failed,
}

pub fn build_quote_url(
    config: &FirmwareConfig,
    symbol: &str,
) -> Result<String<QUOTE_URL_MAX_BYTES>, TransportError> {
    let mut url = String::new();
    write!(
        url,
        "{}?function=TIME_SERIES_DAILY&symbol={}&outputsize=compact&apikey={}",
        config.quote_base_url, symbol, config.api_key
    )
    .map_err(|_| TransportError::BadUrl)?;
    Ok(url)
}

/// Fetch one active slot. `now` is the cycle's best-known epoch; `body` is
/// the caller's response scratch buffer.
pub async fn fetch_symbol<T, D>(
    config: &FirmwareConfig,
    slot: &mut SymbolSlot,
    series: &mut SymbolSeries,
    now: u64,
    transport: &mut T,
    delay: &mut D,
    body: &mut [u8],
) -> SlotFetchOutcome
where
    T: QuoteTransport,
    D: DelayNs,
{
    debug_assert!(slot.is_active());

    if slot.in_cooldown(now) {
        info!(
            "fetch {}: cooling down for {}s more, reusing cached series",
            slot.symbol.as_str(),
            slot.cooldown_until - now
        );
        return SlotFetchOutcome::CachedByCooldown;
    }

    let url = match build_quote_url(config, slot.symbol.as_str()) {
        Ok(url) => url,
        Err(_) => {
            // Only reachable with an oversized base URL or API key baked
            // into the build; treat like any other exhausted fetch.
            warn!("fetch {}: request URL over budget", slot.symbol.as_str());
            slot.status = SlotStatus::Failed;
            slot.cooldown_until = now.saturating_add(config.quote_cooldown_secs);
            return SlotFetchOutcome::Failed;
        }
    };

    let mut policy = FetchPolicy::Idle;
    loop {
        let attempt = policy.begin_attempt();
        debug!(
            "fetch {}: attempt {}/{}",
            slot.symbol.as_str(),
            attempt,
            config.quote_max_attempts
        );

        match transport.get(&url, body).await {
            Ok(len) => {
                let mut points: Vec<PricePoint, QUOTE_PARSE_MAX_POINTS> = Vec::new();
                match parse_daily_series(&body[..len], &mut points) {
                    Ok(()) => {
                        let stats = series.merge(&points);
                        slot.status = SlotStatus::Success;
                        slot.last_success_epoch = now;
                        slot.cooldown_until = 0;
                        policy.settle();
                        info!(
                            "fetch {}: {} points (appended={} replaced={} stale={})",
                            slot.symbol.as_str(),
                            points.len(),
                            stats.appended,
                            stats.replaced,
                            stats.skipped
                        );
                        return SlotFetchOutcome::Fresh(stats);
                    }
                    Err(err) => {
                        warn!("fetch {}: unusable payload: {:?}", slot.symbol.as_str(), err);
                    }
                }
            }
            Err(err) => {
                warn!("fetch {}: transport error: {:?}", slot.symbol.as_str(), err);
            }
        }

        if attempt >= config.quote_max_attempts {
            let until = policy.exhaust(now, config.quote_cooldown_secs);
            slot.status = SlotStatus::Failed;
            slot.cooldown_until = until;
            warn!(
                "fetch {}: attempts exhausted, cooling down until {}",
                slot.symbol.as_str(),
                until
            );
            return SlotFetchOutcome::Failed;
        }

        delay.delay_ms(config.quote_retry_delay_ms).await;
    }
}
