//! Battery voltage sensing through the ADC divider.

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcChannel, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::ADC1;
use log::debug;

const SAMPLES: u32 = 8;
/// Raw full scale at 11 dB attenuation.
const RAW_FULL_SCALE: u32 = 4_095;
const FULL_SCALE_MV: u32 = 3_100;
/// The sense pin sits behind a 1:2 divider on the pack rail.
const DIVIDER_RATIO: u32 = 2;

pub struct BatterySense<'d, P: AdcChannel> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<P, ADC1<'d>>,
}

impl<'d, P: AdcChannel> BatterySense<'d, P> {
    pub fn new(adc: ADC1<'d>, pin: P) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin(pin, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc, config),
            pin,
        }
    }

    /// Averaged one-shot reading converted to pack millivolts. Returns 0
    /// when every sample fails, which the core treats as an implausible
    /// sensor, not a drained pack.
    pub fn read_millivolts(&mut self) -> u16 {
        let mut sum = 0u32;
        let mut count = 0u32;
        for _ in 0..SAMPLES {
            if let Ok(raw) = nb::block!(self.adc.read_oneshot(&mut self.pin)) {
                sum += raw as u32;
                count += 1;
            }
        }

        if count == 0 {
            debug!("battery adc produced no samples");
            return 0;
        }

        let raw = sum / count;
        (raw * FULL_SCALE_MV / RAW_FULL_SCALE * DIVIDER_RATIO) as u16
    }
}
