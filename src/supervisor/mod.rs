//! Station connectivity supervisor.
//!
//! Turns link-layer notifications into a single connection state, keeps
//! reconnecting after failures, and offers two blocking rendezvous points
//! for the rest of the firmware:
//!
//! - [`ConnectivitySupervisor::await_connected`] returns once the link is up
//!   and an address had time to settle
//! - [`ConnectivitySupervisor::await_disconnected`] returns once an
//!   established link is lost
//!
//! # Threads
//!
//! - the link layer's notification context only forwards events into a
//!   channel and never blocks
//! - the `link_events` thread applies events to the state machine (and
//!   sleeps through the post-connect settle period)
//! - the `reconnect` thread runs deferred connect attempts
//! - callers block on the gates from their own threads
//!
//! # State machine
//!
//! ```text
//! DISCONNECTED --connect request accepted--> CONNECTING
//! CONNECTING   --connect result (success)--> CONNECTED     cancel retry, settle, signal connected
//! CONNECTING   --connect result (failure)--> CONNECTING    schedule retry
//! CONNECTED    --disconnect--------------->  DISCONNECTED  signal disconnected once, schedule retry
//! ```
//!
//! # Example
//!
//! ```ignore
//! let supervisor = ConnectivitySupervisor::new(link, credentials, indicator, Timings::default())?;
//! supervisor.initialize()?;
//! loop {
//!     supervisor.await_connected();
//!     // start services...
//!     supervisor.await_disconnected();
//! }
//! ```

mod reconnect;

pub use reconnect::{ReconnectScheduler, StopCheck};

use crate::config::{StationCredentials, Timings};
use crate::indicator::{Rgb, StatusIndicator};
use crate::link::{LinkDriver, LinkError, LinkEvent};
use crate::sync::{lock, Gate};
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while settling after a connect.
const SETTLE_SLICE: Duration = Duration::from_millis(50);

/// Connection state of the station link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link and no accepted connect request.
    Disconnected,
    /// A connect request was accepted; waiting for the outcome.
    Connecting,
    /// Link is up and the address had time to settle.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
struct LinkState {
    connection: ConnectionState,
    /// Bumped by every loss/failure report; lets a settling success notice
    /// that the link dropped underneath it.
    epoch: u64,
}

/// Messages for the `link_events` thread.
enum Dispatch {
    Event(LinkEvent),
    Shutdown,
}

/// State shared between the supervisor handle and its threads.
struct Shared<L: LinkDriver> {
    link: Arc<L>,
    credentials: StationCredentials,
    indicator: Arc<StatusIndicator>,
    timings: Timings,
    state: Mutex<LinkState>,
    connected: Gate,
    disconnected: Gate,
    interface_ready: AtomicBool,
    /// Set on drop; cuts a settle wait short.
    closing: AtomicBool,
    retry: ReconnectScheduler,
}

impl<L: LinkDriver> Shared<L> {
    fn connect_to_wifi(&self) -> Result<(), LinkError> {
        if !self.interface_ready.load(Ordering::Acquire) {
            warn!("STA: interface not initialized");
            return Err(LinkError::InterfaceUnavailable);
        }

        info!("Connecting to SSID: {}...", self.credentials.ssid());
        self.link.submit_connect(&self.credentials)?;

        let mut state = lock(&self.state);
        if state.connection == ConnectionState::Disconnected {
            state.connection = ConnectionState::Connecting;
        }
        Ok(())
    }

    /// Submit until the link layer accepts the request.
    ///
    /// Returns `false` if `stopped` reported shutdown first.
    fn submit_until_accepted(&self, stopped: StopCheck<'_>) -> bool {
        loop {
            match self.connect_to_wifi() {
                Ok(()) => return true,
                Err(e) => warn!(
                    "Connect request rejected: {}; retrying in {:?}",
                    e, self.timings.submit_retry
                ),
            }
            if stopped() {
                return false;
            }
            thread::sleep(self.timings.submit_retry);
            if stopped() {
                return false;
            }
        }
    }

    fn handle_event(&self, event: LinkEvent) {
        debug!("Link event: {:?}", event);
        match event {
            LinkEvent::ConnectResult { success } => self.on_connect_result(success),
            LinkEvent::Disconnected => self.on_disconnect(),
        }
    }

    fn on_connect_result(&self, success: bool) {
        if !success {
            {
                let mut state = lock(&self.state);
                state.epoch += 1;
                match state.connection {
                    ConnectionState::Connected => {
                        warn!("Connect failure reported on an established link");
                        self.disconnected.give();
                        state.connection = ConnectionState::Connecting;
                    }
                    ConnectionState::Disconnected => {
                        warn!("Connect failure without a pending request; staying disconnected");
                    }
                    ConnectionState::Connecting => {}
                }
            }
            warn!(
                "Connection to {} failed; retrying in {:?}",
                self.credentials.ssid(),
                self.timings.reconnect_delay
            );
            self.retry.rearm(self.timings.reconnect_delay);
            return;
        }

        self.retry.cancel();

        let epoch = {
            let state = lock(&self.state);
            match state.connection {
                ConnectionState::Connected => {
                    warn!("Connect result while already connected; ignoring");
                    return;
                }
                ConnectionState::Disconnected => {
                    warn!("Connect result without a pending request; accepting it");
                }
                ConnectionState::Connecting => {}
            }
            state.epoch
        };

        self.indicator.set_color(Rgb::LINK_UP);

        info!(
            "Taking IPv4 address (settling for {:?})...",
            self.timings.connect_settle
        );
        if !self.settle() {
            debug!("Settle interrupted by shutdown");
            return;
        }

        match self.link.assigned_address() {
            Some(ip) => info!("The IPv4 address: {}", ip),
            None => warn!("Failed to take network configuration"),
        }

        let mut state = lock(&self.state);
        if state.epoch != epoch {
            warn!(
                "Link to {} dropped while settling",
                self.credentials.ssid()
            );
            return;
        }
        state.connection = ConnectionState::Connected;
        self.connected.give();
        info!("Connected to {}", self.credentials.ssid());
    }

    /// Sleep through the connect settle period in short slices.
    ///
    /// Returns `false` if the supervisor started closing meanwhile.
    fn settle(&self) -> bool {
        let deadline = Instant::now() + self.timings.connect_settle;
        loop {
            if self.closing.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SETTLE_SLICE));
        }
    }

    fn on_disconnect(&self) {
        info!("Disconnection event is triggered.");
        {
            let mut state = lock(&self.state);
            state.epoch += 1;
            if state.connection == ConnectionState::Connected {
                state.connection = ConnectionState::Disconnected;
                self.disconnected.give();
                info!("Link to {} lost", self.credentials.ssid());
            }
        }

        self.indicator.set_color(Rgb::LINK_LOST);
        self.retry.rearm(self.timings.reconnect_delay);
    }
}

/// Connectivity supervisor for one station link.
pub struct ConnectivitySupervisor<L: LinkDriver> {
    shared: Arc<Shared<L>>,
    events: Sender<Dispatch>,
    subscription: Mutex<Option<L::Subscription>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<L: LinkDriver> ConnectivitySupervisor<L> {
    /// Create the supervisor and its worker threads.
    ///
    /// Nothing touches the link until [`initialize`](Self::initialize).
    pub fn new(
        link: Arc<L>,
        credentials: StationCredentials,
        indicator: Arc<StatusIndicator>,
        timings: Timings,
    ) -> Result<Self, SupervisorError> {
        let shared = Arc::new(Shared {
            link,
            credentials,
            indicator,
            timings,
            state: Mutex::new(LinkState {
                connection: ConnectionState::Disconnected,
                epoch: 0,
            }),
            connected: Gate::new(),
            disconnected: Gate::new(),
            interface_ready: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            retry: ReconnectScheduler::new(),
        });

        let weak: Weak<Shared<L>> = Arc::downgrade(&shared);
        shared.retry.start(move |stopped| {
            if let Some(shared) = weak.upgrade() {
                info!(
                    "Attempting to reconnect to the WiFi network {}...",
                    shared.credentials.ssid()
                );
                shared.submit_until_accepted(stopped);
            }
        })?;

        let (events, rx) = mpsc::channel();
        let dispatcher = Self::spawn_dispatcher(shared.clone(), rx)?;

        Ok(Self {
            shared,
            events,
            subscription: Mutex::new(None),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    fn spawn_dispatcher(shared: Arc<Shared<L>>, rx: Receiver<Dispatch>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("link_events".into())
            .spawn(move || {
                while let Ok(Dispatch::Event(event)) = rx.recv() {
                    shared.handle_event(event);
                }
                debug!("Link event dispatch stopped");
            })
    }

    /// Register for link events, bring the station interface up and submit
    /// the first connect request.
    ///
    /// Blocks until the link layer *accepts* a request (retrying at the
    /// submit spacing), then waits the startup settle period. It does not
    /// wait for the link to come up; use
    /// [`await_connected`](Self::await_connected) for that.
    pub fn initialize(&self) -> Result<(), SupervisorError> {
        {
            let mut subscription = lock(&self.subscription);
            if subscription.is_some() {
                return Err(SupervisorError::AlreadyInitialized);
            }
            let events = self.events.clone();
            *subscription = Some(self.shared.link.subscribe(Box::new(move |event: LinkEvent| {
                // Send only fails once the dispatcher has shut down
                let _ = events.send(Dispatch::Event(event));
            }))?);
        }

        self.shared.link.bring_up()?;
        self.shared.interface_ready.store(true, Ordering::Release);

        self.shared.submit_until_accepted(&|| false);

        info!(
            "Connect request accepted; settling for {:?}",
            self.shared.timings.startup_settle
        );
        thread::sleep(self.shared.timings.startup_settle);
        Ok(())
    }

    /// Submit one connect request built from the station credentials.
    ///
    /// Reports whether the request was accepted, not whether the link came
    /// up. Safe to call concurrently with the reconnect timer.
    pub fn connect_to_wifi(&self) -> Result<(), LinkError> {
        self.shared.connect_to_wifi()
    }

    /// Apply a connect-result notification.
    ///
    /// Normally called on the `link_events` thread; blocks for the connect
    /// settle period on success.
    pub fn on_connect_result(&self, success: bool) {
        self.shared.on_connect_result(success);
    }

    /// Apply a disconnect notification.
    pub fn on_disconnect(&self) {
        self.shared.on_disconnect();
    }

    /// Block until the link is connected. Consumes one readiness permit.
    pub fn await_connected(&self) {
        info!("Waiting for IPv4 address, i.e., WiFi connection completed...");
        self.shared.connected.take();
        info!("WiFi connection is established and IPv4 address is received.");
    }

    /// Like [`await_connected`](Self::await_connected) with a timeout.
    ///
    /// Returns `true` if a permit was consumed.
    pub fn await_connected_timeout(&self, timeout: Duration) -> bool {
        self.shared.connected.take_timeout(timeout)
    }

    /// Block until an established link is lost. Consumes one loss permit.
    pub fn await_disconnected(&self) {
        info!("Pending here until WiFi disconnection is detected...");
        self.shared.disconnected.take();
        info!("WiFi connection is lost.");
    }

    /// Like [`await_disconnected`](Self::await_disconnected) with a timeout.
    pub fn await_disconnected_timeout(&self, timeout: Duration) -> bool {
        self.shared.disconnected.take_timeout(timeout)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.state).connection
    }

    /// Check if the link is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Check whether a reconnect attempt is pending.
    pub fn retry_pending(&self) -> bool {
        self.shared.retry.is_armed()
    }

    /// Number of reconnect attempts the timer has started.
    pub fn retries_fired(&self) -> u64 {
        self.shared.retry.fired_count()
    }

    /// Number of times the disconnected gate has been signalled.
    pub fn disconnect_signals(&self) -> u64 {
        self.shared.disconnected.give_count()
    }

    /// Station credentials in use.
    pub fn credentials(&self) -> &StationCredentials {
        &self.shared.credentials
    }
}

impl<L: LinkDriver> Drop for ConnectivitySupervisor<L> {
    fn drop(&mut self) {
        // Order matters: no callback or retry may run against state that is
        // about to be released.
        info!("Supervisor is deleted and unregistering WiFi event callback.");
        drop(lock(&self.subscription).take());
        self.shared.retry.shutdown();

        self.shared.closing.store(true, Ordering::Release);
        let _ = self.events.send(Dispatch::Shutdown);
        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Link event thread panicked");
            }
        }
    }
}

/// Errors that can occur while setting up the supervisor.
#[derive(Debug)]
pub enum SupervisorError {
    /// `initialize` was called twice.
    AlreadyInitialized,
    /// The link layer failed during setup.
    Link(LinkError),
    /// A worker thread could not be spawned.
    Thread(io::Error),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "supervisor already initialized"),
            Self::Link(e) => write!(f, "link error: {}", e),
            Self::Thread(e) => write!(f, "failed to spawn thread: {}", e),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Link(e) => Some(e),
            Self::Thread(e) => Some(e),
            Self::AlreadyInitialized => None,
        }
    }
}

impl From<LinkError> for SupervisorError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<io::Error> for SupervisorError {
    fn from(e: io::Error) -> Self {
        Self::Thread(e)
    }
}
