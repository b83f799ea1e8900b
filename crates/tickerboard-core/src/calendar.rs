//! Civil-time arithmetic for wake scheduling and quote dates.
//!
//! Freestanding epoch/civil conversions (no libc on this target). Days use
//! the proleptic Gregorian calendar; epochs are seconds since 1970-01-01
//! UTC.

pub const SECS_PER_DAY: u64 = 86_400;
pub const SECS_PER_HOUR: u64 = 3_600;
pub const SECS_PER_MINUTE: u64 = 60;

/// Days since 1970-01-01 for a civil date, negative before the epoch.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Day index (days since 1970-01-01) for a validated civil date.
/// Rejects out-of-range fields and pre-epoch dates.
pub fn day_index(year: i64, month: u32, day: u32) -> Option<u32> {
    if !(1970..=2199).contains(&year) || !(1..=12).contains(&month) {
        return None;
    }
    if day == 0 || day > days_in_month(year, month) {
        return None;
    }
    let days = days_from_civil(year, month, day);
    u32::try_from(days).ok()
}

/// Next local occurrence of `hour:minute` strictly after `now_epoch`,
/// returned as a UTC epoch. `utc_offset_secs` is the combined GMT + DST
/// offset of the display's locale.
pub fn next_update_epoch(now_epoch: u64, hour: u8, minute: u8, utc_offset_secs: i32) -> u64 {
    let local = now_epoch as i64 + utc_offset_secs as i64;
    let local_day = local.div_euclid(SECS_PER_DAY as i64);
    let target_in_day =
        hour as i64 * SECS_PER_HOUR as i64 + minute as i64 * SECS_PER_MINUTE as i64;

    let mut target = local_day * SECS_PER_DAY as i64 + target_in_day;
    if target <= local {
        target += SECS_PER_DAY as i64;
    }

    (target - utc_offset_secs as i64).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_index_matches_known_dates() {
        assert_eq!(day_index(1970, 1, 1), Some(0));
        assert_eq!(day_index(1970, 1, 2), Some(1));
        assert_eq!(day_index(2000, 3, 1), Some(11_017));
        // 2024-01-05 per `date -d 2024-01-05 +%s` / 86400.
        assert_eq!(day_index(2024, 1, 5), Some(19_727));
    }

    #[test]
    fn day_index_rejects_invalid_fields() {
        assert_eq!(day_index(1969, 12, 31), None);
        assert_eq!(day_index(2024, 0, 1), None);
        assert_eq!(day_index(2024, 13, 1), None);
        assert_eq!(day_index(2024, 2, 30), None);
        assert_eq!(day_index(2023, 2, 29), None);
        assert_eq!(day_index(2024, 2, 29), Some(19_782));
    }

    #[test]
    fn next_update_is_later_today_when_time_has_not_passed() {
        // 2024-01-05 12:00:00 UTC, zero offset, update at 19:00.
        let noon = 19_727 * SECS_PER_DAY + 12 * SECS_PER_HOUR;
        let next = next_update_epoch(noon, 19, 0, 0);
        assert_eq!(next, 19_727 * SECS_PER_DAY + 19 * SECS_PER_HOUR);
    }

    #[test]
    fn next_update_rolls_to_tomorrow_when_time_has_passed() {
        let evening = 19_727 * SECS_PER_DAY + 20 * SECS_PER_HOUR;
        let next = next_update_epoch(evening, 19, 0, 0);
        assert_eq!(next, 19_728 * SECS_PER_DAY + 19 * SECS_PER_HOUR);
    }

    #[test]
    fn exact_update_instant_schedules_the_next_day() {
        let at_update = 19_727 * SECS_PER_DAY + 19 * SECS_PER_HOUR;
        let next = next_update_epoch(at_update, 19, 0, 0);
        assert_eq!(next, at_update + SECS_PER_DAY);
    }

    #[test]
    fn negative_offset_shifts_the_utc_instant() {
        // Eastern winter time: local 19:00 is 00:00 UTC the next day.
        let offset = -18_000;
        let noon_utc = 19_727 * SECS_PER_DAY + 12 * SECS_PER_HOUR;
        let next = next_update_epoch(noon_utc, 19, 0, offset);
        assert_eq!(next as i64 + offset as i64, 19_727 * SECS_PER_DAY as i64 + 19 * SECS_PER_HOUR as i64);
        assert!(next > noon_utc);
    }

    #[test]
    fn minutes_are_honored() {
        let start_of_day = 19_727 * SECS_PER_DAY;
        let next = next_update_epoch(start_of_day, 6, 30, 0);
        assert_eq!(next, start_of_day + 6 * SECS_PER_HOUR + 30 * SECS_PER_MINUTE);
    }
}
