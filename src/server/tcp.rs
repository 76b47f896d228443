//! Byte-stream data-plane server.
//!
//! Serves one client at a time: accept, read until the peer closes or the
//! read fails, then go back to accept.

use super::{
    is_poll_timeout, DataPlaneServer, ServerCore, ServerError, TrafficStats, WorkerContext,
    WorkerExit, WorkerState, DEFAULT_BIND_ADDR, MAX_PAYLOAD, POLL_INTERVAL, RECV_BUFFER_SIZE,
};
use crate::config::Protocol;
use crate::indicator::StatusIndicator;
use log::{debug, info, warn};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Listening socket as seen by the stream worker.
pub(crate) trait StreamListener {
    type Conn: StreamConn;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Wait up to one poll interval for a client.
    ///
    /// `Ok(None)` means nobody connected in time.
    fn poll_accept(&self) -> io::Result<Option<(Self::Conn, SocketAddr)>>;
}

/// Connected client as seen by the stream worker.
pub(crate) trait StreamConn {
    /// Read into `buf`, waiting up to one poll interval.
    ///
    /// `Ok(None)` means no data arrived in time; `Ok(Some(0))` means the
    /// peer closed the connection.
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

impl StreamListener for TcpListener {
    type Conn = TcpStream;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn poll_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.accept() {
            Ok((stream, peer)) => {
                // Some platforms hand out the listener's non-blocking mode
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_read_timeout(Some(POLL_INTERVAL)));
                match configured {
                    Ok(()) => Ok(Some((stream, peer))),
                    Err(e) => {
                        warn!("Dropping client {}: {}", peer, e);
                        Ok(None)
                    }
                }
            }
            Err(e) if is_poll_timeout(&e) => {
                thread::sleep(POLL_INTERVAL);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl StreamConn for TcpStream {
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_poll_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Pending connections queued while a client is being served.
pub const LISTEN_BACKLOG: i32 = 1;

pub(crate) fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Accept loop. Returns when stopped or on a fatal accept error.
pub(crate) fn serve_stream<L: StreamListener>(listener: L, ctx: &WorkerContext) -> WorkerExit {
    match listener.local_addr() {
        Ok(addr) => ctx.listening(addr),
        Err(e) => return ctx.setup_failed("listen", &e),
    }

    loop {
        if ctx.stopping() {
            return WorkerExit::Shutdown;
        }
        match listener.poll_accept() {
            Ok(None) => {}
            Ok(Some((conn, peer))) => {
                ctx.client_accepted(peer);
                serve_client(conn, peer, ctx);
            }
            Err(e) => return ctx.fault("accept", &e),
        }
    }
}

/// Read loop for one client. The connection closes when `conn` drops.
fn serve_client<C: StreamConn>(mut conn: C, peer: SocketAddr, ctx: &WorkerContext) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        if ctx.stopping() {
            debug!("{}: closing {} for shutdown", ctx.name(), peer);
            return;
        }
        match conn.poll_read(&mut buf[..MAX_PAYLOAD]) {
            Ok(None) => {}
            Ok(Some(0)) => {
                info!("{}: {} closed the connection", ctx.name(), peer);
                return;
            }
            Ok(Some(n)) => ctx.received(&buf[..n], peer),
            Err(e) => {
                warn!("{}: receive from {} failed: {}", ctx.name(), peer, e);
                return;
            }
        }
    }
}

/// TCP data-plane server.
pub struct TcpServer {
    core: ServerCore,
}

impl TcpServer {
    /// Create a server for `port` on all interfaces. Nothing is bound until
    /// [`start`](DataPlaneServer::start).
    pub fn new(port: u16, indicator: Arc<StatusIndicator>) -> Self {
        Self {
            core: ServerCore::new(
                "tcp_server",
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

impl DataPlaneServer for TcpServer {
    fn protocol(&self) -> Protocol {
        Protocol::Stream
    }

    fn start(&mut self) -> Result<(), ServerError> {
        let addr = self.core.bind_addr();
        info!("Starting TCP server on {}", addr);
        self.core.spawn(move |ctx| match bind_listener(addr) {
            Ok(listener) => serve_stream(listener, ctx),
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
