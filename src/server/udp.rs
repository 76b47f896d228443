//! Datagram data-plane server.

use super::{
    is_poll_timeout, DataPlaneServer, ServerCore, ServerError, TrafficStats, WorkerContext,
    WorkerExit, WorkerState, DEFAULT_BIND_ADDR, MAX_PAYLOAD, POLL_INTERVAL, RECV_BUFFER_SIZE,
};
use crate::config::Protocol;
use crate::indicator::StatusIndicator;
use log::info;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Bound datagram socket as seen by the worker.
pub(crate) trait DatagramSocket {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Receive one datagram, waiting up to one poll interval.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn poll_recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

impl DatagramSocket for UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn poll_recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if is_poll_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    Ok(socket)
}

/// Receive loop. Any receive error ends the worker.
pub(crate) fn serve_datagrams<S: DatagramSocket>(socket: S, ctx: &WorkerContext) -> WorkerExit {
    match socket.local_addr() {
        Ok(addr) => ctx.listening(addr),
        Err(e) => return ctx.setup_failed("bind", &e),
    }

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        if ctx.stopping() {
            return WorkerExit::Shutdown;
        }
        match socket.poll_recv(&mut buf[..MAX_PAYLOAD]) {
            Ok(None) => {}
            Ok(Some((n, peer))) => ctx.received(&buf[..n], peer),
            Err(e) => return ctx.fault("receive", &e),
        }
    }
}

/// UDP data-plane server.
pub struct UdpServer {
    core: ServerCore,
}

impl UdpServer {
    /// Create a server for `port` on all interfaces. Nothing is bound until
    /// [`start`](DataPlaneServer::start).
    pub fn new(port: u16, indicator: Arc<StatusIndicator>) -> Self {
        Self {
            core: ServerCore::new(
                "udp_server",
                SocketAddr::new(DEFAULT_BIND_ADDR, port),
                indicator,
            ),
        }
    }

    /// Bind to `ip` instead of all interfaces.
    pub fn with_bind_addr(mut self, ip: IpAddr) -> Self {
        self.core.set_bind_ip(ip);
        self
    }
}

impl DataPlaneServer for UdpServer {
    fn protocol(&self) -> Protocol {
        Protocol::Datagram
    }

    fn start(&mut self) -> Result<(), ServerError> {
        let addr = self.core.bind_addr();
        info!("Starting UDP server on {}", addr);
        self.core.spawn(move |ctx| match bind_socket(addr) {
            Ok(socket) => serve_datagrams(socket, ctx),
            Err(e) => ctx.setup_failed("bind", &e),
        })
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    fn state(&self) -> WorkerState {
        self.core.state()
    }

    fn wait_ready(&self, timeout: Duration) -> WorkerState {
        self.core.wait_ready(timeout)
    }

    fn stats(&self) -> Arc<TrafficStats> {
        self.core.stats()
    }
}
