//! Host stand-in for the status pixel.

use super::{IndicatorError, LedDriver, Rgb};
use log::info;

/// Pixel driver that logs every color change.
#[derive(Debug, Default)]
pub struct LogLed {
    last: Option<Rgb>,
}

impl LogLed {
    /// Create a new logging driver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedDriver for LogLed {
    fn write(&mut self, color: Rgb) -> Result<(), IndicatorError> {
        if self.last != Some(color) {
            info!("LED -> {}", color);
        }
        self.last = Some(color);
        Ok(())
    }
}
