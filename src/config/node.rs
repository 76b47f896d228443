//! Process-level node configuration.
//!
//! On the host every value is read from the environment at startup. On the
//! device the same variable names are baked in at compile time, since
//! ESP-IDF has no process environment.

use super::{ConfigError, StationCredentials};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default data-plane port (matches the sender scripts).
pub const DEFAULT_PORT: u16 = 4321;

/// Environment variable holding the network SSID.
pub const ENV_SSID: &str = "NODE_WIFI_SSID";
/// Environment variable holding the pre-shared key.
pub const ENV_PSK: &str = "NODE_WIFI_PSK";
/// Environment variable selecting the data-plane protocol (`tcp` or `udp`).
pub const ENV_PROTOCOL: &str = "NODE_PROTOCOL";
/// Environment variable holding the data-plane port.
pub const ENV_PORT: &str = "NODE_PORT";

/// Spacing between rejected connect submissions.
pub const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Delay before reconnecting after a link loss or failed attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Grace period after a connect event before the assigned address is read.
/// The link stack needs this long to finish address assignment.
pub const CONNECT_SETTLE: Duration = Duration::from_secs(10);

/// Pause after the first connect request is accepted.
pub const STARTUP_SETTLE: Duration = Duration::from_secs(5);

/// Pause before the station is created at boot.
pub const BOOT_DELAY: Duration = Duration::from_secs(5);

/// Data-plane protocol. Exactly one runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
}

impl Protocol {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "tcp",
            Self::Datagram => "udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" | "stream" => Ok(Self::Stream),
            "udp" | "datagram" => Ok(Self::Datagram),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed delays used by the connectivity layer.
///
/// The defaults are empirical workarounds for the link stack's
/// address-assignment timing, not derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Spacing between rejected connect submissions.
    pub submit_retry: Duration,
    /// Delay before a scheduled reconnect fires.
    pub reconnect_delay: Duration,
    /// Grace period after a successful connect event.
    pub connect_settle: Duration,
    /// Pause after `initialize()` gets its request accepted.
    pub startup_settle: Duration,
    /// Pause before the supervisor is initialized at boot.
    pub boot_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            submit_retry: SUBMIT_RETRY_DELAY,
            reconnect_delay: RECONNECT_DELAY,
            connect_settle: CONNECT_SETTLE,
            startup_settle: STARTUP_SETTLE,
            boot_delay: BOOT_DELAY,
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Station credentials.
    pub credentials: StationCredentials,
    /// Data-plane protocol.
    pub protocol: Protocol,
    /// Data-plane port.
    pub port: u16,
    /// Connectivity delays.
    pub timings: Timings,
}

impl NodeConfig {
    /// Create a configuration with default timings.
    pub fn new(credentials: StationCredentials, protocol: Protocol, port: u16) -> Self {
        Self {
            credentials,
            protocol,
            port,
            timings: Timings::default(),
        }
    }

    /// Load the configuration from the process environment, falling back to
    /// values captured at build time.
    ///
    /// Optional timing overrides are read from `NODE_SUBMIT_RETRY_MS`,
    /// `NODE_RECONNECT_DELAY_MS`, `NODE_CONNECT_SETTLE_MS`,
    /// `NODE_STARTUP_SETTLE_MS` and `NODE_BOOT_DELAY_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| build_time_value(key)))
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ssid = lookup(ENV_SSID).ok_or(ConfigError::Missing(ENV_SSID))?;
        let psk = lookup(ENV_PSK).unwrap_or_default();
        let credentials = StationCredentials::new(ssid, psk)?;

        let protocol = match lookup(ENV_PROTOCOL) {
            Some(value) => value.parse()?,
            None => Protocol::Datagram,
        };

        let port = match lookup(ENV_PORT) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value))?,
            None => DEFAULT_PORT,
        };

        let defaults = Timings::default();
        let timings = Timings {
            submit_retry: millis(&lookup, "NODE_SUBMIT_RETRY_MS", defaults.submit_retry)?,
            reconnect_delay: millis(&lookup, "NODE_RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
            connect_settle: millis(&lookup, "NODE_CONNECT_SETTLE_MS", defaults.connect_settle)?,
            startup_settle: millis(&lookup, "NODE_STARTUP_SETTLE_MS", defaults.startup_settle)?,
            boot_delay: millis(&lookup, "NODE_BOOT_DELAY_MS", defaults.boot_delay)?,
        };

        Ok(Self {
            credentials,
            protocol,
            port,
            timings,
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration { key, value }),
        None => Ok(default),
    }
}

/// Values captured by `option_env!` when the firmware was built.
fn build_time_value(key: &str) -> Option<String> {
    let value = match key {
        ENV_SSID => option_env!("NODE_WIFI_SSID"),
        ENV_PSK => option_env!("NODE_WIFI_PSK"),
        ENV_PROTOCOL => option_env!("NODE_PROTOCOL"),
        ENV_PORT => option_env!("NODE_PORT"),
        _ => None,
    };
    value.map(str::to_string)
}
