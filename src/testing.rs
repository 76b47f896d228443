//! Test doubles shared by the unit tests.

use crate::config::{StationCredentials, Timings};
use crate::indicator::{IndicatorError, LedDriver, Rgb};
use crate::link::{EventHandler, HandlerSlot, LinkDriver, LinkError, LinkEvent, SlotSubscription};
use crate::server::tcp::{StreamConn, StreamListener};
use crate::server::udp::DatagramSocket;
use crate::server::POLL_INTERVAL;
use crate::sync::lock;
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns the final result.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Millisecond-scale delays for state machine tests.
pub fn fast_timings() -> Timings {
    Timings {
        submit_retry: Duration::from_millis(20),
        reconnect_delay: Duration::from_millis(30),
        connect_settle: Duration::from_millis(10),
        startup_settle: Duration::from_millis(5),
        boot_delay: Duration::ZERO,
    }
}

/// LED driver that records every color it is asked to render.
pub struct RecordingLed {
    history: Arc<Mutex<Vec<Rgb>>>,
}

impl RecordingLed {
    pub fn new() -> (Self, Arc<Mutex<Vec<Rgb>>>) {
        let history = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                history: history.clone(),
            },
            history,
        )
    }
}

impl LedDriver for RecordingLed {
    fn write(&mut self, color: Rgb) -> Result<(), IndicatorError> {
        lock(&self.history).push(color);
        Ok(())
    }
}

/// LED driver whose writes always fail.
pub struct FailingLed;

impl LedDriver for FailingLed {
    fn write(&mut self, _color: Rgb) -> Result<(), IndicatorError> {
        Err(IndicatorError::Write("pixel unplugged".into()))
    }
}

/// Link driver with scripted submission outcomes.
///
/// Submissions are accepted unless a rejection is queued. Every attempt is
/// timestamped, accepted or not.
#[derive(Default)]
pub struct ScriptedLink {
    handlers: HandlerSlot,
    rejects: AtomicUsize,
    fail_bring_up: bool,
    auto_connect: bool,
    up: AtomicBool,
    submissions: Mutex<Vec<Instant>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `count` submissions.
    pub fn rejecting(self, count: usize) -> Self {
        self.rejects.store(count, Ordering::SeqCst);
        self
    }

    /// Fail `bring_up`.
    pub fn failing_bring_up(mut self) -> Self {
        self.fail_bring_up = true;
        self
    }

    /// Report success from a background thread for every accepted submission.
    pub fn auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    /// Reject the next `count` submissions.
    pub fn reject_next(&self, count: usize) {
        self.rejects.store(count, Ordering::SeqCst);
    }

    /// Timestamps of every submission attempt.
    pub fn submissions(&self) -> Vec<Instant> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handlers.is_registered()
    }

    /// Deliver `event` as the link layer would.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.handlers.emit(event)
    }
}

impl LinkDriver for ScriptedLink {
    type Subscription = SlotSubscription;

    fn subscribe(&self, handler: EventHandler) -> Result<Self::Subscription, LinkError> {
        Ok(self.handlers.install(handler))
    }

    fn bring_up(&self) -> Result<(), LinkError> {
        if self.fail_bring_up {
            return Err(LinkError::Rejected("no station interface".into()));
        }
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn submit_connect(&self, _credentials: &StationCredentials) -> Result<(), LinkError> {
        lock(&self.submissions).push(Instant::now());

        let rejected = self
            .rejects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(LinkError::Rejected("busy".into()));
        }

        if self.auto_connect {
            let handlers = self.handlers.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                handlers.emit(LinkEvent::ConnectResult { success: true });
            });
        }
        Ok(())
    }

    fn assigned_address(&self) -> Option<Ipv4Addr> {
        if self.up.load(Ordering::SeqCst) {
            Some(Ipv4Addr::new(192, 168, 1, 50))
        } else {
            None
        }
    }
}

/// Listener that is "bound" but fails every accept.
pub struct FailingAcceptor {
    addr: SocketAddr,
}

impl FailingAcceptor {
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 4321)),
        }
    }
}

/// Connection type for [`FailingAcceptor`]; uninhabited.
pub enum NoConn {}

impl StreamConn for NoConn {
    fn poll_read(&mut self, _buf: &mut [u8]) -> io::Result<Option<usize>> {
        match *self {}
    }
}

impl StreamListener for FailingAcceptor {
    type Conn = NoConn;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn poll_accept(&self) -> io::Result<Option<(NoConn, SocketAddr)>> {
        Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
    }
}

/// Client connection replaying a script of reads.
///
/// Once the script runs out the peer closes the connection.
pub struct ScriptedConn {
    script: VecDeque<io::Result<Vec<u8>>>,
}

impl ScriptedConn {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    pub fn data(mut self, payload: &[u8]) -> Self {
        self.script.push_back(Ok(payload.to_vec()));
        self
    }

    pub fn error(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(Err(io::Error::from(kind)));
        self
    }
}

impl StreamConn for ScriptedConn {
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.script.pop_front() {
            Some(Ok(payload)) => {
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                Ok(Some(n))
            }
            Some(Err(e)) => Err(e),
            None => Ok(Some(0)),
        }
    }
}

/// Listener handing out scripted clients, then idling.
pub struct ScriptedListener {
    clients: Mutex<VecDeque<ScriptedConn>>,
}

impl ScriptedListener {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(VecDeque::new()),
        }
    }

    pub fn client(self, conn: ScriptedConn) -> Self {
        lock(&self.clients).push_back(conn);
        self
    }
}

impl StreamListener for ScriptedListener {
    type Conn = ScriptedConn;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 4321)))
    }

    fn poll_accept(&self) -> io::Result<Option<(ScriptedConn, SocketAddr)>> {
        let next = lock(&self.clients).pop_front();
        match next {
            Some(conn) => Ok(Some((conn, SocketAddr::from((Ipv4Addr::new(192, 168, 1, 7), 5000))))),
            None => {
                thread::sleep(POLL_INTERVAL);
                Ok(None)
            }
        }
    }
}

/// Datagram socket replaying a script of datagrams and errors.
///
/// Once the script runs out it behaves like an idle socket.
pub struct ScriptedDatagrams {
    script: Mutex<VecDeque<io::Result<Vec<u8>>>>,
    peer: SocketAddr,
}

impl ScriptedDatagrams {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            peer: SocketAddr::from((Ipv4Addr::new(192, 168, 1, 7), 5000)),
        }
    }

    pub fn datagram(self, payload: &[u8]) -> Self {
        lock(&self.script).push_back(Ok(payload.to_vec()));
        self
    }

    pub fn error(self, kind: io::ErrorKind) -> Self {
        lock(&self.script).push_back(Err(io::Error::from(kind)));
        self
    }
}

impl DatagramSocket for ScriptedDatagrams {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 4321)))
    }

    fn poll_recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let next = lock(&self.script).pop_front();
        match next {
            Some(Ok(payload)) => {
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                Ok(Some((n, self.peer)))
            }
            Some(Err(e)) => Err(e),
            None => {
                thread::sleep(POLL_INTERVAL);
                Ok(None)
            }
        }
    }
}
