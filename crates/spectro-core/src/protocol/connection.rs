//! Connection state
//!
//! The state is shared between the driver, which moves it through
//! `Disconnected -> Connecting -> Connected`, and the command worker, which
//! drops back to `Disconnected` on its own when the transport dies.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the serial port
    Connecting,
    /// Port open and worker running
    Connected,
}

#[derive(Debug)]
struct Link {
    state: ConnectionState,
    port_name: Option<String>,
}

/// Shared handle on the connection state
#[derive(Debug, Clone)]
pub struct LinkState {
    inner: Arc<Mutex<Link>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkState {
    /// A link in `Disconnected`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Link {
                state: ConnectionState::Disconnected,
                port_name: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Link) -> R) -> R {
        let mut link = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut link)
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.with(|link| link.state)
    }

    /// Whether commands can be sent
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Port of the current (or in-progress) connection
    pub fn port_name(&self) -> Option<String> {
        self.with(|link| link.port_name.clone())
    }

    /// Enter `Connecting` for `port_name`
    pub(crate) fn begin_connect(&self, port_name: &str) {
        self.with(|link| {
            link.state = ConnectionState::Connecting;
            link.port_name = Some(port_name.to_string());
        });
        info!("connection: connecting to {}", port_name);
    }

    /// Enter `Connected`
    pub(crate) fn set_connected(&self) {
        let port = self.with(|link| {
            link.state = ConnectionState::Connected;
            link.port_name.clone()
        });
        info!("connection: connected to {}", port.unwrap_or_default());
    }

    /// Enter `Disconnected`, returning the state that was left
    pub(crate) fn set_disconnected(&self) -> ConnectionState {
        let previous = self.with(|link| {
            link.port_name = None;
            std::mem::replace(&mut link.state, ConnectionState::Disconnected)
        });
        if previous != ConnectionState::Disconnected {
            info!("connection: disconnected (was {:?})", previous);
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        let link = LinkState::new();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(link.port_name().is_none());

        link.begin_connect("/dev/ttyUSB0");
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert_eq!(link.port_name().as_deref(), Some("/dev/ttyUSB0"));

        link.set_connected();
        assert!(link.is_connected());

        assert_eq!(link.set_disconnected(), ConnectionState::Connected);
        assert_eq!(link.set_disconnected(), ConnectionState::Disconnected);
        assert!(link.port_name().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let link = LinkState::new();
        let worker_side = link.clone();
        link.begin_connect("COM3");
        link.set_connected();
        worker_side.set_disconnected();
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
