//! Station credentials.
//!
//! Platform-independent so the validation rules can be tested on the host.
//!
//! # Example
//!
//! ```
//! use wifi_sta_node::config::StationCredentials;
//!
//! let credentials = StationCredentials::new("MyNetwork", "MyPassword").unwrap();
//! assert_eq!(credentials.ssid(), "MyNetwork");
//! assert!(!credentials.is_open());
//! ```

use super::ConfigError;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum pre-shared key length for WPA2.
pub const MAX_PSK_LEN: usize = 64;

/// Minimum pre-shared key length for WPA2.
pub const MIN_PSK_LEN: usize = 8;

/// Credentials for joining an access point.
///
/// Immutable once built. The pre-shared key is wiped from memory when the
/// value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StationCredentials {
    ssid: String,
    psk: String,
}

impl StationCredentials {
    /// Create validated credentials for a WPA2-PSK network.
    pub fn new(ssid: impl Into<String>, psk: impl Into<String>) -> Result<Self, ConfigError> {
        let credentials = Self {
            ssid: ssid.into(),
            psk: psk.into(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Create credentials for an open network (no key).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.psk.is_empty() && self.psk.len() < MIN_PSK_LEN {
            return Err(ConfigError::PskTooShort {
                len: self.psk.len(),
                min: MIN_PSK_LEN,
            });
        }
        if self.psk.len() > MAX_PSK_LEN {
            return Err(ConfigError::PskTooLong {
                len: self.psk.len(),
                max: MAX_PSK_LEN,
            });
        }

        Ok(())
    }

    /// Network SSID.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Pre-shared key (empty for open networks).
    pub fn psk(&self) -> &str {
        &self.psk
    }

    /// Check if this is an open network (no key).
    pub fn is_open(&self) -> bool {
        self.psk.is_empty()
    }
}

// Never print the key.
impl fmt::Debug for StationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationCredentials")
            .field("ssid", &self.ssid)
            .field("psk", &if self.is_open() { "<none>" } else { "<redacted>" })
            .finish()
    }
}
