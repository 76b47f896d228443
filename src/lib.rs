//! Wi-Fi station node firmware library.
//!
//! Keeps a single station link up, tells data-plane services when the link
//! is ready or lost, and shows link/service state on an RGB indicator.
//!
//! Everything except the ESP-IDF drivers is platform-independent and is
//! tested on the host machine.

pub mod config;
pub mod indicator;
pub mod link;
pub mod node;
pub mod server;
pub mod supervisor;
pub mod sync;
#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::{ConfigError, NodeConfig, Protocol, StationCredentials, Timings};
pub use indicator::{Rgb, StatusIndicator};
pub use link::{LinkDriver, LinkError, LinkEvent};
pub use node::{Node, NodeError};
pub use server::{DataPlaneServer, ServerError, TcpServer, UdpServer, WorkerExit, WorkerState};
pub use supervisor::{ConnectionState, ConnectivitySupervisor, SupervisorError};
