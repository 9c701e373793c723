//! Server state and configuration.

use std::time::Duration;

use crate::session::ConnectionSession;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the controller's serial device (e.g., "/dev/ttyACM0")
    pub device_path: String,
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Connect to the in-process simulator instead of `device_path`
    pub simulate: bool,
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub session: ConnectionSession,
}

impl AppState {
    pub fn new(config: ServerConfig, session: ConnectionSession) -> Self {
        Self { config, session }
    }
}

/// Carriage pass time used by the simulator behind `--simulate`.
pub const SIMULATED_PASS_TIME: Duration = Duration::from_millis(800);
