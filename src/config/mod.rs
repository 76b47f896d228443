//! Node configuration.
//!
//! # Components
//!
//! - [`wifi`] - station credentials and their validation
//! - [`node`] - process-level settings (protocol, port, delays)

mod node;
mod wifi;

use std::fmt;

pub use node::{
    NodeConfig, Protocol, Timings, BOOT_DELAY, CONNECT_SETTLE, DEFAULT_PORT, ENV_PORT,
    ENV_PROTOCOL, ENV_PSK, ENV_SSID, RECONNECT_DELAY, STARTUP_SETTLE, SUBMIT_RETRY_DELAY,
};
pub use wifi::{StationCredentials, MAX_PSK_LEN, MAX_SSID_LEN, MIN_PSK_LEN};

/// Errors that can occur while building the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Pre-shared key is too short for WPA2.
    PskTooShort { len: usize, min: usize },
    /// Pre-shared key exceeds maximum length.
    PskTooLong { len: usize, max: usize },
    /// A required setting is not present.
    Missing(&'static str),
    /// Protocol name is neither stream nor datagram.
    UnknownProtocol(String),
    /// Port is not a 16-bit number.
    InvalidPort(String),
    /// Delay override is not a number of milliseconds.
    InvalidDuration { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PskTooShort { len, min } => {
                write!(f, "pre-shared key too short: {} bytes (min {})", len, min)
            }
            Self::PskTooLong { len, max } => {
                write!(f, "pre-shared key too long: {} bytes (max {})", len, max)
            }
            Self::Missing(key) => write!(f, "missing setting: {}", key),
            Self::UnknownProtocol(name) => write!(f, "unknown protocol: {}", name),
            Self::InvalidPort(value) => write!(f, "invalid port: {}", value),
            Self::InvalidDuration { key, value } => {
                write!(f, "invalid delay for {}: {}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
