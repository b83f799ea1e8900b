use core::time::Duration;

use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::{Rtc, sleep::TimerWakeupSource};

/// Final stop of every wake cycle: deep sleep with a timer wake source.
/// Never returns; the next boot re-enters `main` from reset.
pub(super) fn enter_deep_sleep(sleep_secs: u64) -> ! {
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    let timer = TimerWakeupSource::new(Duration::from_secs(sleep_secs));
    rtc.sleep_deep(&[&timer]);
}
