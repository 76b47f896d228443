//! Link-layer abstraction.
//!
//! This module is the boundary to the network subsystem that owns the radio:
//! - **ESP32** (`esp32` feature): `EspWifi` station driven through ESP-IDF
//! - **Host**: the OS already owns networking; [`HostLink`] simulates the
//!   station events on top of it
//!
//! The supervisor only ever talks to a [`LinkDriver`], so the same state
//! machine runs on both platforms.

mod host;
#[cfg(feature = "esp32")]
mod esp32;

pub use host::HostLink;
#[cfg(feature = "esp32")]
pub use esp32::EspLink;

use crate::config::StationCredentials;
use crate::sync::lock;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Asynchronous notification from the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Outcome of a previously submitted connect request.
    ConnectResult { success: bool },
    /// The station lost (or never obtained) its association.
    Disconnected,
}

/// Callback invoked on the link layer's own notification context.
///
/// Handlers must return quickly; they may not block.
pub type EventHandler = Box<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Network subsystem as seen by the connectivity supervisor.
pub trait LinkDriver: Send + Sync + 'static {
    /// Registration token; dropping it deregisters the handler.
    type Subscription: Send;

    /// Register `handler` for connect/disconnect notifications.
    fn subscribe(&self, handler: EventHandler) -> Result<Self::Subscription, LinkError>;

    /// Resolve and start the default station interface.
    fn bring_up(&self) -> Result<(), LinkError>;

    /// Hand a connect request to the link layer.
    ///
    /// Success means the request was queued, not that the link is up. The
    /// outcome arrives later as a [`LinkEvent`].
    fn submit_connect(&self, credentials: &StationCredentials) -> Result<(), LinkError>;

    /// Address currently assigned to the station interface, if any.
    fn assigned_address(&self) -> Option<Ipv4Addr>;
}

type SharedHandler = Arc<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Holder for at most one registered handler.
///
/// Drivers without a native event loop use this to implement
/// [`LinkDriver::subscribe`].
#[derive(Clone, Default)]
pub struct HandlerSlot {
    handler: Arc<Mutex<Option<SharedHandler>>>,
}

impl HandlerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous one.
    pub fn install(&self, handler: EventHandler) -> SlotSubscription {
        *lock(&self.handler) = Some(Arc::from(handler));
        SlotSubscription { slot: self.clone() }
    }

    /// Deliver `event` to the installed handler.
    ///
    /// Returns `false` if nothing is registered. The handler runs without
    /// the slot lock held, so it may deregister itself.
    pub fn emit(&self, event: LinkEvent) -> bool {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Check whether a handler is registered.
    pub fn is_registered(&self) -> bool {
        lock(&self.handler).is_some()
    }
}

/// Subscription returned by [`HandlerSlot::install`].
pub struct SlotSubscription {
    slot: HandlerSlot,
}

impl Drop for SlotSubscription {
    fn drop(&mut self) {
        lock(&self.slot.handler).take();
    }
}

/// Errors that can occur in the link layer.
#[derive(Debug)]
pub enum LinkError {
    /// The station interface has not been resolved yet.
    InterfaceUnavailable,
    /// SSID does not fit the driver's configuration.
    InvalidSsid,
    /// Pre-shared key does not fit the driver's configuration.
    InvalidPsk,
    /// The link layer refused the request.
    Rejected(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterfaceUnavailable => write!(f, "station interface not initialized"),
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPsk => write!(f, "invalid pre-shared key"),
            Self::Rejected(reason) => write!(f, "request rejected: {}", reason),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for LinkError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for LinkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_without_handler() {
        let slot = HandlerSlot::new();
        assert!(!slot.is_registered());
        assert!(!slot.emit(LinkEvent::Disconnected));
    }

    #[test]
    fn test_emit_reaches_handler() {
        let slot = HandlerSlot::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let _subscription = slot.install(Box::new(move |event: LinkEvent| {
            assert_eq!(event, LinkEvent::ConnectResult { success: true });
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(slot.emit(LinkEvent::ConnectResult { success: true }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_subscription_deregisters() {
        let slot = HandlerSlot::new();
        let subscription = slot.install(Box::new(|_: LinkEvent| {}));
        assert!(slot.is_registered());

        drop(subscription);
        assert!(!slot.is_registered());
        assert!(!slot.emit(LinkEvent::Disconnected));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            LinkError::InterfaceUnavailable.to_string(),
            "station interface not initialized"
        );
        assert_eq!(
            LinkError::Rejected("busy".into()).to_string(),
            "request rejected: busy"
        );
    }
}
