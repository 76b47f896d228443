//! RGB status indicator.
//!
//! A single RGB pixel shows what the node is doing:
//!
//! | Color  | Meaning                                      |
//! |--------|----------------------------------------------|
//! | red    | link lost, or a data-plane worker faulted    |
//! | yellow | link up, waiting for the address to settle   |
//! | green  | data-plane server listening                  |
//!
//! Rendering failures are logged and otherwise ignored: the indicator is
//! never allowed to take the node down.

mod host;
#[cfg(feature = "esp32")]
mod ws2812;

pub use host::LogLed;
#[cfg(feature = "esp32")]
pub use ws2812::Ws2812Led;

use crate::sync::lock;
use log::{debug, error};
use std::fmt;
use std::sync::Mutex;

/// 3-channel color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb::new(0x0f, 0x00, 0x00);
    pub const GREEN: Rgb = Rgb::new(0x00, 0x0f, 0x00);
    pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0x0f);
    pub const YELLOW: Rgb = Rgb::new(0x0f, 0x0f, 0x00);
    pub const OFF: Rgb = Rgb::new(0x00, 0x00, 0x00);

    /// Link lost; reconnect pending.
    pub const LINK_LOST: Rgb = Rgb::RED;
    /// Link up, address assignment in progress.
    pub const LINK_UP: Rgb = Rgb::YELLOW;
    /// Data-plane server is listening.
    pub const SERVICE_READY: Rgb = Rgb::GREEN;
    /// Data-plane worker hit a fatal socket error.
    pub const SERVICE_FAULT: Rgb = Rgb::RED;

    /// Create a color from its components.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Hardware (or simulated) pixel driver.
pub trait LedDriver: Send {
    /// Push a color to the pixel.
    fn write(&mut self, color: Rgb) -> Result<(), IndicatorError>;
}

/// Shared handle to the node's one status pixel.
///
/// Construct once at startup and pass around as `Arc<StatusIndicator>`.
pub struct StatusIndicator {
    driver: Mutex<Box<dyn LedDriver>>,
    current: Mutex<Option<Rgb>>,
}

impl StatusIndicator {
    /// Wrap a pixel driver.
    pub fn new(driver: impl LedDriver + 'static) -> Self {
        Self {
            driver: Mutex::new(Box::new(driver)),
            current: Mutex::new(None),
        }
    }

    /// Render `color`. Last write wins.
    pub fn set_color(&self, color: Rgb) {
        let mut driver = lock(&self.driver);
        match driver.write(color) {
            Ok(()) => {
                debug!("Indicator set to {}", color);
                *lock(&self.current) = Some(color);
            }
            Err(e) => error!("Couldn't update indicator to {}: {}", color, e),
        }
    }

    /// The last color that was rendered successfully.
    pub fn current(&self) -> Option<Rgb> {
        *lock(&self.current)
    }
}

/// Errors reported by a pixel driver.
#[derive(Debug)]
pub enum IndicatorError {
    /// The driver rejected the update.
    Write(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(msg) => write!(f, "write failed: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for IndicatorError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for IndicatorError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}
