//! Onboard temperature sensor (ADC channel 4).
use embedded_hal::adc::OneShot;
use rp2040_hal::adc::{Adc, TempSense};

/// `adc_read() * 3.3/4096` converted to Celsius via the RP2040 datasheet's
/// published sensor slope, same formula the original reads off the same
/// channel.
const CONVERSION_FACTOR: f32 = 3.3 / ((1 << 12) as f32);

pub struct Temperature {
    adc: Adc,
    sensor: TempSense,
}

impl Temperature {
    pub fn new(adc: Adc, sensor: TempSense) -> Self {
        Self { adc, sensor }
    }

    pub fn read_celsius(&mut self) -> f32 {
        let raw: u16 = self.adc.read(&mut self.sensor).unwrap_or(0);
        let adc_v = raw as f32 * CONVERSION_FACTOR;
        27.0 - (adc_v - 0.706) / 0.001721
    }
}
