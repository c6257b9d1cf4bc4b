//! Session error types

use std::path::PathBuf;

use dc_bridge::AdbError;
use thiserror::Error;

/// Errors that can abort a session before it reaches the connected state.
///
/// All of them converge on the `on_connection_failed` callback;
/// `Interrupted` is an ordinary abort caused by a stop request and is
/// only logged at debug level.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No device, or more than one, matched the selection request
    #[error("Device resolution failed: {0}")]
    DeviceResolution(#[source] AdbError),

    /// The device never exposed its network debug port
    #[error("Timed out waiting for TCP/IP mode")]
    TcpModeTimeout,

    /// The final network-transport connect failed
    #[error("Could not connect to {addr}")]
    TcpConnectFailed {
        addr: String,
        #[source]
        source: AdbError,
    },

    /// The device's own network address could not be determined
    #[error("Device IP address not found")]
    IpNotFound,

    /// The agent artifact is missing or not a regular file
    #[error("Agent artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// The agent artifact could not be pushed to the device
    #[error("Could not push agent to device")]
    PushFailed(#[source] AdbError),

    /// The tunnel could not be opened
    #[error("Could not open tunnel")]
    Tunnel(#[source] AdbError),

    /// No local port in the configured range could be bound
    #[error("No free port in range {first}..={last}")]
    NoPortAvailable { first: u16, last: u16 },

    /// The agent process could not be spawned
    #[error("Could not launch agent")]
    Launch(#[source] AdbError),

    /// A channel could not be accepted over the reverse tunnel
    #[error("Could not accept {channel} channel")]
    Accept {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The forward-mode retry budget was exhausted
    #[error("Agent not reachable after {attempts} connection attempts")]
    ConnectExhausted { attempts: u32 },

    /// An additional forward-mode channel could not be connected
    #[error("Could not connect {channel} channel")]
    Connect {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The device-info handshake block could not be read
    #[error("Could not read device information")]
    DeviceInfo(#[source] std::io::Error),

    /// A stop request aborted the stage in progress
    #[error("Interrupted")]
    Interrupted,

    /// Any other bridge failure
    #[error("Bridge error")]
    Bridge(#[source] AdbError),
}

impl SessionError {
    /// Whether this is an ordinary stop-requested abort
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<AdbError> for SessionError {
    fn from(err: AdbError) -> Self {
        match err {
            AdbError::Interrupted => Self::Interrupted,
            other => Self::Bridge(other),
        }
    }
}
