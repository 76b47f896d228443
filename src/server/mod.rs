//! Data-plane servers.
//!
//! A data-plane server owns one worker thread bound to a port. The worker
//! logs every payload it receives and reflects its health on the status
//! indicator (green once listening, red on a fatal socket error).
//!
//! Two variants exist and exactly one runs at a time:
//! - [`TcpServer`]: accepts one client at a time and reads its byte stream
//! - [`UdpServer`]: receives datagrams from anyone
//!
//! Workers poll a shutdown flag between socket operations that time out
//! after [`POLL_INTERVAL`], so [`DataPlaneServer::stop`] never hangs on a
//! blocked receive.

pub(crate) mod tcp;
pub(crate) mod udp;

pub use tcp::TcpServer;
pub use udp::UdpServer;

use crate::config::Protocol;
use crate::indicator::{Rgb, StatusIndicator};
use crate::sync::lock;
use log::{error, info, warn};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receive buffer size.
pub const RECV_BUFFER_SIZE: usize = 128;

/// Largest payload taken per read (one byte of the buffer stays spare).
pub const MAX_PAYLOAD: usize = RECV_BUFFER_SIZE - 1;

/// How often a blocked worker checks for shutdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bind address (all interfaces).
pub const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// A data-plane server.
pub trait DataPlaneServer: Send {
    /// Which transport this server speaks.
    fn protocol(&self) -> Protocol;

    /// Spawn the worker thread.
    ///
    /// Returns once the thread exists; binding happens on the worker. Use
    /// [`wait_ready`](Self::wait_ready) to learn the outcome.
    fn start(&mut self) -> Result<(), ServerError>;

    /// Close the sockets and join the worker. Idempotent.
    fn stop(&mut self);

    /// Current worker state.
    fn state(&self) -> WorkerState;

    /// Wait up to `timeout` for the worker to leave [`WorkerState::Starting`].
    fn wait_ready(&self, timeout: Duration) -> WorkerState;

    /// Traffic counters for this server.
    fn stats(&self) -> Arc<TrafficStats>;
}

/// Create the server for `protocol`, listening on all interfaces.
pub fn for_protocol(
    protocol: Protocol,
    port: u16,
    indicator: Arc<StatusIndicator>,
) -> Box<dyn DataPlaneServer> {
    match protocol {
        Protocol::Stream => Box::new(TcpServer::new(port, indicator)),
        Protocol::Datagram => Box::new(UdpServer::new(port, indicator)),
    }
}

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Never started.
    Idle,
    /// Thread spawned, socket not bound yet.
    Starting,
    /// Bound and serving on the given address.
    Listening(SocketAddr),
    /// Worker exited.
    Stopped(WorkerExit),
}

impl WorkerState {
    /// Check whether the worker is serving.
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening(_))
    }
}

/// Why a worker exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped on request.
    Shutdown,
    /// Socket could not be created or bound.
    SetupFailed,
    /// Fatal accept/receive error while serving.
    Fault,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown"),
            Self::SetupFailed => write!(f, "setup failed"),
            Self::Fault => write!(f, "socket fault"),
        }
    }
}

/// Observable worker state with a bounded wait.
#[derive(Debug)]
pub struct WorkerStatus {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Idle),
            changed: Condvar::new(),
        }
    }

    fn set(&self, state: WorkerState) {
        *lock(&self.state) = state;
        self.changed.notify_all();
    }

    /// Current state.
    pub fn get(&self) -> WorkerState {
        *lock(&self.state)
    }

    /// Wait until the worker leaves `Starting`, or `timeout` passes.
    pub fn wait_ready(&self, timeout: Duration) -> WorkerState {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while *state == WorkerState::Starting {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *state
    }
}

/// Traffic counters for one data-plane server.
#[derive(Debug, Default)]
pub struct TrafficStats {
    /// Payloads received.
    pub payloads: AtomicUsize,
    /// Payload bytes received.
    pub bytes: AtomicUsize,
    /// Stream clients accepted.
    pub clients: AtomicUsize,
    last_payload: Mutex<Vec<u8>>,
}

impl TrafficStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted client.
    pub fn record_client(&self) {
        self.clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a received payload.
    pub fn record_payload(&self, payload: &[u8]) {
        self.payloads.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload.len(), Ordering::Relaxed);
        let mut last = lock(&self.last_payload);
        last.clear();
        last.extend_from_slice(payload);
    }

    /// Number of payloads received.
    pub fn payload_count(&self) -> usize {
        self.payloads.load(Ordering::Relaxed)
    }

    /// Number of clients accepted.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// Copy of the most recent payload.
    pub fn last_payload(&self) -> Vec<u8> {
        lock(&self.last_payload).clone()
    }
}

impl fmt::Display for TrafficStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} payloads ({} bytes) from {} clients",
            self.payloads.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.clients.load(Ordering::Relaxed)
        )
    }
}

/// What a worker thread sees of its server.
pub(crate) struct WorkerContext {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    status: Arc<WorkerStatus>,
    stats: Arc<TrafficStats>,
    indicator: Arc<StatusIndicator>,
}

impl WorkerContext {
    fn new(
        name: &'static str,
        status: Arc<WorkerStatus>,
        stats: Arc<TrafficStats>,
        indicator: Arc<StatusIndicator>,
    ) -> Self {
        Self {
            name,
            shutdown: Arc::new(AtomicBool::new(false)),
            status,
            stats,
            indicator,
        }
    }

    pub(crate) fn stopping(&self) -> bool {
        // Acquire pairs with the Release store in ServerCore::stop
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn listening(&self, addr: SocketAddr) {
        info!("{}: listening on {}", self.name, addr);
        self.status.set(WorkerState::Listening(addr));
        self.indicator.set_color(Rgb::SERVICE_READY);
    }

    pub(crate) fn setup_failed(&self, what: &str, e: &io::Error) -> WorkerExit {
        error!("{}: {} failed: {}", self.name, what, e);
        WorkerExit::SetupFailed
    }

    pub(crate) fn fault(&self, what: &str, e: &io::Error) -> WorkerExit {
        error!("{}: {} failed: {}", self.name, what, e);
        self.indicator.set_color(Rgb::SERVICE_FAULT);
        WorkerExit::Fault
    }

    pub(crate) fn client_accepted(&self, peer: SocketAddr) {
        self.stats.record_client();
        info!("{}: accepted connection from {}", self.name, peer);
    }

    pub(crate) fn received(&self, payload: &[u8], peer: SocketAddr) {
        self.stats.record_payload(payload);
        info!(
            "{}: received {} bytes from {}: {}",
            self.name,
            payload.len(),
            peer,
            String::from_utf8_lossy(payload)
        );
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Thread management shared by both server variants.
pub(crate) struct ServerCore {
    name: &'static str,
    bind_addr: SocketAddr,
    indicator: Arc<StatusIndicator>,
    status: Arc<WorkerStatus>,
    stats: Arc<TrafficStats>,
    worker: Option<Worker>,
}

impl ServerCore {
    pub(crate) fn new(name: &'static str, bind_addr: SocketAddr, indicator: Arc<StatusIndicator>) -> Self {
        Self {
            name,
            bind_addr,
            indicator,
            status: Arc::new(WorkerStatus::new()),
            stats: Arc::new(TrafficStats::new()),
            worker: None,
        }
    }

    pub(crate) fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub(crate) fn set_bind_ip(&mut self, ip: IpAddr) {
        self.bind_addr.set_ip(ip);
    }

    /// Spawn `body` on a fresh worker thread.
    pub(crate) fn spawn<F>(&mut self, body: F) -> Result<(), ServerError>
    where
        F: FnOnce(&WorkerContext) -> WorkerExit + Send + 'static,
    {
        if let Some(worker) = &self.worker {
            let exited = matches!(self.status.get(), WorkerState::Stopped(_));
            if !exited && !worker.handle.is_finished() {
                return Err(ServerError::AlreadyRunning);
            }
        }
        // Reap a worker that already exited on its own
        self.join_worker();

        let ctx = WorkerContext::new(
            self.name,
            self.status.clone(),
            self.stats.clone(),
            self.indicator.clone(),
        );
        let shutdown = ctx.shutdown.clone();

        self.status.set(WorkerState::Starting);
        let handle = thread::Builder::new()
            .name(self.name.into())
            .spawn(move || {
                let exit = body(&ctx);
                info!("{}: worker stopped ({})", ctx.name, exit);
                ctx.status.set(WorkerState::Stopped(exit));
            })
            .map_err(|e| {
                self.status.set(WorkerState::Idle);
                ServerError::Thread(e)
            })?;

        self.worker = Some(Worker { shutdown, handle });
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            // Release ordering so the worker sees the flag on its next poll
            worker.shutdown.store(true, Ordering::Release);
        }
        if self.join_worker() {
            info!("{}: stopped after {}", self.name, self.stats);
        }
    }

    fn join_worker(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                if worker.handle.join().is_err() {
                    warn!("{}: worker panicked", self.name);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.status.get()
    }

    pub(crate) fn wait_ready(&self, timeout: Duration) -> WorkerState {
        self.status.wait_ready(timeout)
    }

    pub(crate) fn stats(&self) -> Arc<TrafficStats> {
        self.stats.clone()
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Check whether `e` only means "nothing arrived within the poll interval".
pub(crate) fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Errors reported when starting a server.
#[derive(Debug)]
pub enum ServerError {
    /// The worker is still running.
    AlreadyRunning,
    /// The worker thread could not be spawned.
    Thread(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "server already running"),
            Self::Thread(e) => write!(f, "failed to spawn worker: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Thread(e) => Some(e),
            Self::AlreadyRunning => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Thread(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingLed;

    fn test_indicator() -> Arc<StatusIndicator> {
        let (led, _history) = RecordingLed::new();
        Arc::new(StatusIndicator::new(led))
    }

    #[test]
    fn test_buffer_limits() {
        assert_eq!(RECV_BUFFER_SIZE, 128);
        assert_eq!(MAX_PAYLOAD, 127);
    }

    #[test]
    fn test_traffic_stats_record() {
        let stats = TrafficStats::new();
        stats.record_client();
        stats.record_payload(b"hello");
        stats.record_payload(b"ping");

        assert_eq!(stats.payload_count(), 2);
        assert_eq!(stats.client_count(), 1);
        assert_eq!(stats.bytes.load(Ordering::Relaxed), 9);
        assert_eq!(stats.last_payload(), b"ping");
        assert_eq!(stats.to_string(), "2 payloads (9 bytes) from 1 clients");
    }

    #[test]
    fn test_for_protocol_picks_variant() {
        let server = for_protocol(Protocol::Stream, 4321, test_indicator());
        assert_eq!(server.protocol(), Protocol::Stream);
        assert_eq!(server.state(), WorkerState::Idle);

        let server = for_protocol(Protocol::Datagram, 4321, test_indicator());
        assert_eq!(server.protocol(), Protocol::Datagram);
    }

    #[test]
    fn test_core_runs_body_and_reports_exit() {
        let addr = SocketAddr::new(DEFAULT_BIND_ADDR, 0);
        let mut core = ServerCore::new("test_worker", addr, test_indicator());
        core.spawn(|_ctx| WorkerExit::SetupFailed).unwrap();

        let state = core.wait_ready(Duration::from_secs(2));
        assert_eq!(state, WorkerState::Stopped(WorkerExit::SetupFailed));
    }

    #[test]
    fn test_core_rejects_second_start_while_running() {
        let addr = SocketAddr::new(DEFAULT_BIND_ADDR, 0);
        let mut core = ServerCore::new("test_worker", addr, test_indicator());
        core.spawn(|ctx| {
            while !ctx.stopping() {
                thread::sleep(Duration::from_millis(5));
            }
            WorkerExit::Shutdown
        })
        .unwrap();

        assert!(matches!(
            core.spawn(|_ctx| WorkerExit::Shutdown),
            Err(ServerError::AlreadyRunning)
        ));

        core.stop();
        assert_eq!(core.state(), WorkerState::Stopped(WorkerExit::Shutdown));
        // Stop is idempotent
        core.stop();
    }

    #[test]
    fn test_core_restarts_after_worker_exit() {
        let addr = SocketAddr::new(DEFAULT_BIND_ADDR, 0);
        let mut core = ServerCore::new("test_worker", addr, test_indicator());
        core.spawn(|_ctx| WorkerExit::Fault).unwrap();
        assert_eq!(
            core.wait_ready(Duration::from_secs(2)),
            WorkerState::Stopped(WorkerExit::Fault)
        );

        core.spawn(|_ctx| WorkerExit::Shutdown).unwrap();
        assert_eq!(
            core.wait_ready(Duration::from_secs(2)),
            WorkerState::Stopped(WorkerExit::Shutdown)
        );
    }

    #[test]
    fn test_wait_ready_times_out_while_starting() {
        let status = WorkerStatus::new();
        status.set(WorkerState::Starting);
        let start = Instant::now();
        assert_eq!(status.wait_ready(Duration::from_millis(30)), WorkerState::Starting);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_poll_timeout_kinds() {
        assert!(is_poll_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_poll_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_poll_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }
}
