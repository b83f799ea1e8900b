//! Scanning parser for the daily quote payload.
//!
//! The payload is a JSON object whose series section maps `"YYYY-MM-DD"`
//! keys to per-day objects carrying a quoted `"4. close"` value. The
//! scanner walks quoted tokens after the series marker and pairs each date
//! key with the close that follows it; nothing else in the document is
//! interpreted.

use heapless::Vec;

use crate::calendar;
use crate::series::PricePoint;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// No series section. Rate-limit "Note" and "Error Message" payloads
    /// land here.
    MissingSeries,
    BadDate,
    BadPrice,
    NoPoints,
}

const SERIES_MARKER: &[u8] = b"\"Time Series";
const CLOSE_KEY: &[u8] = b"4. close";

/// Parse the payload into chronologically ordered, validated points.
/// Points beyond the caller's capacity are dropped (the payload is newest
/// first, so the retained set is the newest window).
pub fn parse_daily_series<const N: usize>(
    body: &[u8],
    out: &mut Vec<PricePoint, N>,
) -> Result<(), ParseError> {
    let marker = find(body, SERIES_MARKER, 0).ok_or(ParseError::MissingSeries)?;
    let mut cursor = marker + SERIES_MARKER.len();
    let mut current_day: Option<u32> = None;
    let mut full = false;

    while let Some((start, end)) = next_quoted(body, cursor) {
        cursor = end + 1;
        let token = &body[start..end];

        if looks_like_date(token) {
            let day = parse_day(token).ok_or(ParseError::BadDate)?;
            current_day = Some(day);
            continue;
        }

        if token == CLOSE_KEY {
            let Some(day) = current_day.take() else {
                continue;
            };
            let (price_start, price_end) =
                next_quoted(body, cursor).ok_or(ParseError::BadPrice)?;
            cursor = price_end + 1;
            let close = parse_price(&body[price_start..price_end]).ok_or(ParseError::BadPrice)?;
            if out.push(PricePoint { day, close }).is_err() {
                full = true;
                break;
            }
        }
    }

    if out.is_empty() {
        return Err(ParseError::NoPoints);
    }
    if full {
        log::debug!("quote payload larger than parse window; keeping newest {}", N);
    }

    out.sort_unstable_by_key(|p| p.day);
    dedup_by_day(out);
    Ok(())
}

/// Collapse adjacent same-day points after sorting, keeping the later one.
fn dedup_by_day<const N: usize>(points: &mut Vec<PricePoint, N>) {
    let mut write = 0usize;
    for read in 0..points.len() {
        if write > 0 && points[write - 1].day == points[read].day {
            points[write - 1] = points[read];
        } else {
            points[write] = points[read];
            write += 1;
        }
    }
    points.truncate(write);
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&idx| &haystack[idx..idx + needle.len()] == needle)
}

/// Bounds of the next quoted string strictly after `from`, exclusive of
/// the quotes themselves.
fn next_quoted(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let open = (from..bytes.len()).find(|&i| bytes[i] == b'"')?;
    let close = (open + 1..bytes.len()).find(|&i| bytes[i] == b'"')?;
    Some((open + 1, close))
}

fn looks_like_date(token: &[u8]) -> bool {
    token.len() == 10
        && token[4] == b'-'
        && token[7] == b'-'
        && token
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 4 | 7) || b.is_ascii_digit())
}

fn parse_day(token: &[u8]) -> Option<u32> {
    let year = ascii_number(&token[0..4])?;
    let month = ascii_number(&token[5..7])?;
    let day = ascii_number(&token[8..10])?;
    calendar::day_index(year as i64, month, day)
}

fn ascii_number(digits: &[u8]) -> Option<u32> {
    let mut value = 0u32;
    for b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    Some(value)
}

fn parse_price(token: &[u8]) -> Option<f32> {
    let text = core::str::from_utf8(token).ok()?;
    let price: f32 = text.trim().parse().ok()?;
    (price.is_finite() && price > 0.0).then_some(price)
}
