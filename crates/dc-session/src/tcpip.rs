//! Wireless-mode switch
//!
//! Migrates a USB-attached device to network transport, or attaches a
//! device at a known network address. Every wait here is bounded and
//! wakes early on a stop request.

use std::time::Duration;

use dc_bridge::{AdbError, DeviceBridge};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::wait::sleep_unless_stopped;

/// Default port of the device's network debug daemon
pub const ADB_PORT_DEFAULT: u16 = 5555;

/// Device property exposing the network debug port
const TCP_PORT_PROP: &str = "service.adb.tcp.port";

const ENABLE_ATTEMPTS: u32 = 40;
const ENABLE_POLL_DELAY: Duration = Duration::from_millis(250);

/// Append the default port when the address does not carry one
pub fn normalize_addr(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{ADB_PORT_DEFAULT}")
    }
}

/// Read the device's current network debug port, if enabled
async fn adb_tcp_port(
    bridge: &dyn DeviceBridge,
    serial: &str,
    intr: &CancellationToken,
) -> Result<Option<u16>, SessionError> {
    let value = bridge.getprop(serial, TCP_PORT_PROP, intr).await?;
    Ok(value.and_then(|v| v.parse::<u16>().ok()).filter(|&p| p != 0))
}

/// Poll until the network debug port reaches `expected_port`.
///
/// Bounded retries; each delay wakes early when `stop` fires.
async fn wait_tcpip_mode_enabled(
    bridge: &dyn DeviceBridge,
    serial: &str,
    expected_port: u16,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<(), SessionError> {
    if adb_tcp_port(bridge, serial, intr).await? == Some(expected_port) {
        return Ok(());
    }

    tracing::info!("Waiting for TCP/IP mode enabled...");

    for _ in 0..ENABLE_ATTEMPTS {
        if !sleep_unless_stopped(stop, ENABLE_POLL_DELAY).await {
            tracing::debug!("TCP/IP mode waiting interrupted");
            return Err(SessionError::Interrupted);
        }
        if adb_tcp_port(bridge, serial, intr).await? == Some(expected_port) {
            return Ok(());
        }
    }
    Err(SessionError::TcpModeTimeout)
}

/// Switch a locally-attached device to network transport.
///
/// Returns the `ip:port` address under which the device will reappear.
pub async fn switch_to_tcpip(
    bridge: &dyn DeviceBridge,
    serial: &str,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<String, SessionError> {
    tracing::info!(%serial, "Switching device to TCP/IP...");

    let ip = bridge
        .device_ip(serial, intr)
        .await?
        .ok_or(SessionError::IpNotFound)?;

    let port = match adb_tcp_port(bridge, serial, intr).await? {
        Some(port) => {
            tracing::info!(port, "TCP/IP mode already enabled");
            port
        }
        None => {
            tracing::info!(port = ADB_PORT_DEFAULT, "Enabling TCP/IP mode...");
            bridge
                .enable_tcpip(serial, ADB_PORT_DEFAULT, intr)
                .await
                .map_err(|err| match err {
                    AdbError::Interrupted => SessionError::Interrupted,
                    other => SessionError::Bridge(other),
                })?;
            wait_tcpip_mode_enabled(bridge, serial, ADB_PORT_DEFAULT, stop, intr).await?;
            tracing::info!(port = ADB_PORT_DEFAULT, "TCP/IP mode enabled");
            ADB_PORT_DEFAULT
        }
    };

    Ok(format!("{ip}:{port}"))
}

/// Attach the device at `addr` over the network transport.
///
/// A stale previous connection is silently dropped first.
pub async fn connect_to_tcpip(
    bridge: &dyn DeviceBridge,
    addr: &str,
    intr: &CancellationToken,
) -> Result<(), SessionError> {
    // An error is expected when not already connected
    if let Err(err) = bridge.disconnect(addr, intr).await {
        if matches!(err, AdbError::Interrupted) {
            return Err(SessionError::Interrupted);
        }
        tracing::debug!(%addr, %err, "disconnect before connect failed (ignored)");
    }

    tracing::info!(%addr, "Connecting...");
    bridge.connect(addr, intr).await.map_err(|err| match err {
        AdbError::Interrupted => SessionError::Interrupted,
        source => SessionError::TcpConnectFailed {
            addr: addr.to_string(),
            source,
        },
    })?;
    tracing::info!(%addr, "Connected");
    Ok(())
}

/// Wireless mode with an explicitly given address: normalize, connect,
/// and use the address itself as the resolved device identity.
pub async fn configure_known_address(
    bridge: &dyn DeviceBridge,
    addr: &str,
    intr: &CancellationToken,
) -> Result<String, SessionError> {
    let addr = normalize_addr(addr);
    connect_to_tcpip(bridge, &addr, intr).await?;
    Ok(addr)
}

/// Wireless mode starting from an already-selected device.
///
/// A device that is already network-attached is reused as-is; otherwise
/// it is switched over and reconnected under its new address.
pub async fn configure_unknown_address(
    bridge: &dyn DeviceBridge,
    serial: &str,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<String, SessionError> {
    if dc_bridge::device::serial_is_tcpip(serial) {
        tracing::info!(%serial, "Device already connected via TCP/IP");
        return Ok(serial.to_string());
    }

    let addr = switch_to_tcpip(bridge, serial, stop, intr).await?;
    connect_to_tcpip(bridge, &addr, intr).await?;
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_appends_default_port() {
        assert_eq!(normalize_addr("192.168.1.10"), "192.168.1.10:5555");
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        assert_eq!(normalize_addr("192.168.1.10:5556"), "192.168.1.10:5556");
    }
}
