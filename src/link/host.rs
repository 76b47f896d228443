//! Host link driver.
//!
//! On host systems the OS handles networking. This driver accepts every
//! connect request and reports success after a short association delay, so
//! the full connectivity state machine can be exercised without a radio.

use super::{EventHandler, HandlerSlot, LinkDriver, LinkError, LinkEvent, SlotSubscription};
use crate::config::StationCredentials;
use crate::sync::lock;
use log::{debug, info};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Default simulated association time.
pub const DEFAULT_ASSOCIATION_DELAY: Duration = Duration::from_millis(200);

/// Host link driver.
pub struct HostLink {
    handlers: HandlerSlot,
    up: AtomicBool,
    association_delay: Duration,
    address: Mutex<Option<Ipv4Addr>>,
}

impl HostLink {
    /// Create a host link with the default association delay.
    pub fn new() -> Self {
        Self::with_association_delay(DEFAULT_ASSOCIATION_DELAY)
    }

    /// Create a host link that reports connect results after `delay`.
    pub fn with_association_delay(delay: Duration) -> Self {
        Self {
            handlers: HandlerSlot::new(),
            up: AtomicBool::new(false),
            association_delay: delay,
            address: Mutex::new(None),
        }
    }

    /// Report a link drop, as if the access point went away.
    pub fn simulate_disconnect(&self) {
        info!("Simulating station disconnect");
        self.handlers.emit(LinkEvent::Disconnected);
    }

    /// Get the primary local IPv4 address.
    ///
    /// Creates a UDP socket and "connects" it to a public address (nothing
    /// is sent), then reads which local address the OS picked for the
    /// default route.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

impl Default for HostLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDriver for HostLink {
    type Subscription = SlotSubscription;

    fn subscribe(&self, handler: EventHandler) -> Result<Self::Subscription, LinkError> {
        Ok(self.handlers.install(handler))
    }

    fn bring_up(&self) -> Result<(), LinkError> {
        let ip = Self::detect_local_ip();
        match ip {
            Some(ip) => info!("Host network ready, local IP: {}", ip),
            None => info!("Host network ready, no routable address found"),
        }
        *lock(&self.address) = ip;
        self.up.store(true, Ordering::Release);
        Ok(())
    }

    fn submit_connect(&self, credentials: &StationCredentials) -> Result<(), LinkError> {
        if !self.up.load(Ordering::Acquire) {
            return Err(LinkError::InterfaceUnavailable);
        }

        debug!("Host link associating with {}", credentials.ssid());
        let handlers = self.handlers.clone();
        let delay = self.association_delay;
        thread::Builder::new()
            .name("host_link".into())
            .spawn(move || {
                thread::sleep(delay);
                handlers.emit(LinkEvent::ConnectResult { success: true });
            })
            .map_err(|e| LinkError::Rejected(e.to_string()))?;
        Ok(())
    }

    fn assigned_address(&self) -> Option<Ipv4Addr> {
        if !self.up.load(Ordering::Acquire) {
            return None;
        }
        let mut address = lock(&self.address);
        if address.is_none() {
            *address = Self::detect_local_ip();
        }
        *address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_submit_before_bring_up_fails() {
        let link = HostLink::new();
        let credentials = StationCredentials::open("host").unwrap();
        assert!(matches!(
            link.submit_connect(&credentials),
            Err(LinkError::InterfaceUnavailable)
        ));
        assert_eq!(link.assigned_address(), None);
    }

    #[test]
    fn test_submit_reports_success() {
        let link = HostLink::with_association_delay(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel();
        let _subscription = link
            .subscribe(Box::new(move |event: LinkEvent| {
                let _ = tx.send(event);
            }))
            .unwrap();

        link.bring_up().unwrap();
        let credentials = StationCredentials::open("host").unwrap();
        link.submit_connect(&credentials).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, LinkEvent::ConnectResult { success: true });
    }

    #[test]
    fn test_simulate_disconnect() {
        let link = HostLink::new();
        let (tx, rx) = mpsc::channel();
        let _subscription = link
            .subscribe(Box::new(move |event: LinkEvent| {
                let _ = tx.send(event);
            }))
            .unwrap();

        link.simulate_disconnect();
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Disconnected);
    }

    #[test]
    fn test_detect_local_ip() {
        // May be None in air-gapped environments; just verify it doesn't panic
        if let Some(ip) = HostLink::detect_local_ip() {
            assert!(!ip.is_unspecified());
        }
    }
}
