//! Node orchestration.
//!
//! Ties the connectivity supervisor to the data-plane server: every time
//! the link comes up one server is started, and when the link is lost that
//! server is stopped and released before waiting for the next connection.
//!
//! # Example
//!
//! ```ignore
//! let node = Node::new(config, Arc::new(HostLink::new()), indicator)?;
//! node.run()?; // never returns on success
//! ```

use crate::config::NodeConfig;
use crate::indicator::{Rgb, StatusIndicator};
use crate::link::LinkDriver;
use crate::server::{self, DataPlaneServer, ServerError, TrafficStats, WorkerState};
use crate::supervisor::{ConnectivitySupervisor, SupervisorError};
use crate::sync::lock;
use log::{error, info};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

/// Error type for Node operations.
#[derive(Debug)]
pub enum NodeError {
    /// Supervisor setup failed.
    Supervisor(SupervisorError),
    /// Data-plane server could not be started.
    Server(ServerError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Supervisor(e) => write!(f, "supervisor error: {}", e),
            NodeError::Server(e) => write!(f, "server error: {}", e),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Supervisor(e) => Some(e),
            NodeError::Server(e) => Some(e),
        }
    }
}

impl From<SupervisorError> for NodeError {
    fn from(e: SupervisorError) -> Self {
        NodeError::Supervisor(e)
    }
}

impl From<ServerError> for NodeError {
    fn from(e: ServerError) -> Self {
        NodeError::Server(e)
    }
}

/// A station node: one link, one data-plane server at a time.
pub struct Node<L: LinkDriver> {
    config: NodeConfig,
    indicator: Arc<StatusIndicator>,
    supervisor: ConnectivitySupervisor<L>,
    /// Server for the current link session, if any.
    server: Mutex<Option<Box<dyn DataPlaneServer>>>,
}

impl<L: LinkDriver> Node<L> {
    /// Create the node. No link activity happens until [`start`](Self::start).
    pub fn new(
        config: NodeConfig,
        link: Arc<L>,
        indicator: Arc<StatusIndicator>,
    ) -> Result<Self, NodeError> {
        let supervisor = ConnectivitySupervisor::new(
            link,
            config.credentials.clone(),
            indicator.clone(),
            config.timings,
        )?;
        Ok(Self {
            config,
            indicator,
            supervisor,
            server: Mutex::new(None),
        })
    }

    /// Show "link lost", wait out the boot delay and initialize the
    /// supervisor.
    pub fn start(&self) -> Result<(), NodeError> {
        self.indicator.set_color(Rgb::LINK_LOST);

        let boot_delay = self.config.timings.boot_delay;
        if !boot_delay.is_zero() {
            info!("Waiting {:?} before bringing up the station", boot_delay);
            thread::sleep(boot_delay);
        }

        info!(
            "Starting {} node for SSID {} on port {}",
            self.config.protocol,
            self.config.credentials.ssid(),
            self.config.port
        );
        self.supervisor.initialize()?;
        Ok(())
    }

    /// Run one link session: wait for the link, serve until it drops, then
    /// release the server.
    ///
    /// Returns the traffic counters of the session's server.
    pub fn run_cycle(&self) -> Result<Arc<TrafficStats>, NodeError> {
        self.supervisor.await_connected();

        let mut server = server::for_protocol(
            self.config.protocol,
            self.config.port,
            self.indicator.clone(),
        );
        let stats = server.stats();
        server.start()?;
        *lock(&self.server) = Some(server);

        self.supervisor.await_disconnected();

        let server = lock(&self.server).take();
        if let Some(mut server) = server {
            server.stop();
        }
        Ok(stats)
    }

    /// Start the node and serve link sessions forever.
    pub fn run(&self) -> Result<(), NodeError> {
        self.start()?;
        loop {
            if let Err(e) = self.run_cycle() {
                // Still wait for the link to drop before the next session
                error!("Session failed: {}", e);
                self.supervisor.await_disconnected();
            }
        }
    }

    /// State of the current session's server, if one is running.
    pub fn server_state(&self) -> Option<WorkerState> {
        lock(&self.server).as_ref().map(|server| server.state())
    }

    /// The node's connectivity supervisor.
    pub fn supervisor(&self) -> &ConnectivitySupervisor<L> {
        &self.supervisor
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
