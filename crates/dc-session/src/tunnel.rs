//! Tunnel manager
//!
//! Opens the bridged channel between host and device sockets. Reverse
//! (device listens on an abstract name, relayed to a host listener) is
//! preferred; forward (host dials a relayed local port) is used when
//! forced or when reverse setup fails. The device-side endpoint name is
//! derived from the session identifier so concurrent sessions cannot
//! collide.

use dc_bridge::{AdbError, DeviceBridge};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::params::PortRange;

/// Fixed prefix of the device-side abstract socket name
pub const SOCKET_NAME_PREFIX: &str = "devcast_";

/// Device-side endpoint name for a session identifier
pub fn device_socket_name(scid: u32) -> String {
    format!("{SOCKET_NAME_PREFIX}{scid:08x}")
}

/// An open tunnel. Exactly one of forward/reverse mode is active.
#[derive(Debug)]
pub struct Tunnel {
    pub(crate) enabled: bool,
    pub(crate) forward: bool,
    pub(crate) local_port: u16,
    pub(crate) listener: Option<TcpListener>,
    pub(crate) socket_name: String,
}

impl Tunnel {
    /// Open the tunnel, preferring reverse mode.
    ///
    /// A reverse *bind* failure over the whole port range is fatal; a
    /// failure of the device-side reverse command falls back to forward
    /// mode.
    pub async fn open(
        bridge: &dyn DeviceBridge,
        serial: &str,
        scid: u32,
        port_range: PortRange,
        force_forward: bool,
        intr: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let socket_name = device_socket_name(scid);

        if !force_forward {
            match Self::open_reverse(bridge, serial, &socket_name, port_range, intr).await {
                Ok(tunnel) => return Ok(tunnel),
                Err(SessionError::Tunnel(err)) => {
                    tracing::warn!(%err, "Reverse tunnel setup failed, falling back to forward");
                }
                Err(fatal) => return Err(fatal),
            }
        }

        Self::open_forward(bridge, serial, &socket_name, port_range, intr).await
    }

    async fn open_reverse(
        bridge: &dyn DeviceBridge,
        serial: &str,
        socket_name: &str,
        port_range: PortRange,
        intr: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let mut listener = None;
        for port in port_range.iter() {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(l) => {
                    listener = Some((l, port));
                    break;
                }
                Err(err) => {
                    tracing::debug!(port, %err, "Could not listen on port");
                }
            }
        }
        let Some((listener, local_port)) = listener else {
            return Err(SessionError::NoPortAvailable {
                first: port_range.first,
                last: port_range.last,
            });
        };

        bridge
            .reverse(serial, socket_name, local_port, intr)
            .await
            .map_err(|err| match err {
                AdbError::Interrupted => SessionError::Interrupted,
                other => SessionError::Tunnel(other),
            })?;

        tracing::debug!(local_port, socket_name, "Reverse tunnel open");
        Ok(Self {
            enabled: true,
            forward: false,
            local_port,
            listener: Some(listener),
            socket_name: socket_name.to_string(),
        })
    }

    async fn open_forward(
        bridge: &dyn DeviceBridge,
        serial: &str,
        socket_name: &str,
        port_range: PortRange,
        intr: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let mut last_err = None;
        for port in port_range.iter() {
            match bridge.forward(serial, port, socket_name, intr).await {
                Ok(()) => {
                    tracing::debug!(local_port = port, socket_name, "Forward tunnel open");
                    return Ok(Self {
                        enabled: true,
                        forward: true,
                        local_port: port,
                        listener: None,
                        socket_name: socket_name.to_string(),
                    });
                }
                Err(AdbError::Interrupted) => return Err(SessionError::Interrupted),
                Err(err) => {
                    tracing::debug!(port, %err, "Could not forward port");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(SessionError::Tunnel(err)),
            None => Err(SessionError::NoPortAvailable {
                first: port_range.first,
                last: port_range.last,
            }),
        }
    }

    /// Whether the tunnel is in forward mode
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Local port bound (forward) or listened on (reverse)
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Host listener, present in reverse mode while the tunnel is open
    pub fn listener(&self) -> Option<&TcpListener> {
        self.listener.as_ref()
    }

    /// Remove the device-side rule and release the host listener.
    ///
    /// The device endpoint is named global state, so this is called as
    /// soon as all channels are established, not at session end. Close
    /// failures are logged, never propagated.
    pub async fn close(&mut self, bridge: &dyn DeviceBridge, serial: &str, intr: &CancellationToken) {
        if !self.enabled {
            return;
        }
        self.enabled = false;

        let result = if self.forward {
            bridge.forward_remove(serial, self.local_port, intr).await
        } else {
            self.listener = None;
            bridge.reverse_remove(serial, &self.socket_name, intr).await
        };
        if let Err(err) = result {
            tracing::warn!(%err, "Could not close tunnel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_name_is_prefix_plus_8_hex_digits() {
        assert_eq!(device_socket_name(0x12345678), "devcast_12345678");
        assert_eq!(device_socket_name(0x42), "devcast_00000042");
        assert_eq!(device_socket_name(0x42).len(), SOCKET_NAME_PREFIX.len() + 8);
    }

    #[test]
    fn socket_names_differ_across_sessions() {
        assert_ne!(device_socket_name(1), device_socket_name(2));
    }
}
