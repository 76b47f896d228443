//! WS2812 pixel driven by the ESP32 RMT peripheral.

use super::{IndicatorError, LedDriver, Rgb};
use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::{FixedLengthSignal, PinState, Pulse, RmtChannel, TxRmtDriver};
use esp_idf_sys::EspError;
use std::time::Duration;

/// Bits per pixel (8 per channel).
const BITS_PER_PIXEL: usize = 24;

// WS2812 bit timings.
const T0H: Duration = Duration::from_nanos(350);
const T0L: Duration = Duration::from_nanos(800);
const T1H: Duration = Duration::from_nanos(700);
const T1L: Duration = Duration::from_nanos(600);

/// Single on-board WS2812 pixel.
pub struct Ws2812Led<'d> {
    tx: TxRmtDriver<'d>,
}

impl<'d> Ws2812Led<'d> {
    /// Attach to the pixel's data pin through an RMT channel.
    pub fn new<C: RmtChannel>(
        channel: impl Peripheral<P = C> + 'd,
        pin: impl Peripheral<P = impl OutputPin> + 'd,
    ) -> Result<Self, EspError> {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config)?;
        Ok(Self { tx })
    }

    fn encode(&self, color: Rgb) -> Result<FixedLengthSignal<BITS_PER_PIXEL>, EspError> {
        let ticks_hz = self.tx.counter_clock()?;
        let t0h = Pulse::new_with_duration(ticks_hz, PinState::High, &T0H)?;
        let t0l = Pulse::new_with_duration(ticks_hz, PinState::Low, &T0L)?;
        let t1h = Pulse::new_with_duration(ticks_hz, PinState::High, &T1H)?;
        let t1l = Pulse::new_with_duration(ticks_hz, PinState::Low, &T1L)?;

        // The pixel expects GRB order, most significant bit first.
        let grb = (u32::from(color.g) << 16) | (u32::from(color.r) << 8) | u32::from(color.b);

        let mut signal = FixedLengthSignal::<BITS_PER_PIXEL>::new();
        for index in 0..BITS_PER_PIXEL {
            let bit = (grb >> (BITS_PER_PIXEL - 1 - index)) & 1 == 1;
            let pair = if bit { (t1h, t1l) } else { (t0h, t0l) };
            signal.set(index, &pair)?;
        }
        Ok(signal)
    }
}

impl LedDriver for Ws2812Led<'static> {
    fn write(&mut self, color: Rgb) -> Result<(), IndicatorError> {
        let signal = self.encode(color)?;
        self.tx.start_blocking(&signal)?;
        Ok(())
    }
}
