//! Device bridge abstraction
//!
//! The session core drives the device through this trait so it can be
//! exercised against a test double; `Adb` is the real implementation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adb::Adb;
use crate::device::{AdbDevice, DeviceSelector};
use crate::error::AdbError;
use crate::process::AgentProcess;

/// Capabilities the orchestrator needs from the device bridge.
///
/// Every blocking operation takes the session's interrupt token so a stop
/// request can abort it early.
#[async_trait]
pub trait DeviceBridge: Send + Sync + 'static {
    /// Start the bridge daemon
    async fn start_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError>;

    /// Kill the bridge daemon
    async fn kill_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError>;

    /// Resolve a selection request to exactly one usable device
    async fn select_device(
        &self,
        selector: &DeviceSelector,
        intr: &CancellationToken,
    ) -> Result<AdbDevice, AdbError>;

    /// Read a device property (`None` when unset or unreadable)
    async fn getprop(
        &self,
        serial: &str,
        prop: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError>;

    /// Push a local file to an absolute device path
    async fn push(
        &self,
        serial: &str,
        local: &str,
        remote: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Restart the device's debug daemon listening on TCP/IP
    async fn enable_tcpip(
        &self,
        serial: &str,
        port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Attach a network-transport device
    async fn connect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError>;

    /// Detach a network-transport device
    async fn disconnect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError>;

    /// Query the device's own network address
    async fn device_ip(
        &self,
        serial: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError>;

    /// Open a forward tunnel (host dials `local_port`, device listens on
    /// the abstract `socket_name`)
    async fn forward(
        &self,
        serial: &str,
        local_port: u16,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Remove a forward tunnel
    async fn forward_remove(
        &self,
        serial: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Open a reverse tunnel (device dials the abstract `socket_name`,
    /// relayed to the host's `local_port`)
    async fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Remove a reverse tunnel
    async fn reverse_remove(
        &self,
        serial: &str,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError>;

    /// Launch the agent with the given device shell argument vector,
    /// inheriting stdout/stderr
    fn spawn_agent(&self, serial: &str, shell_args: Vec<String>)
        -> Result<AgentProcess, AdbError>;
}

#[async_trait]
impl DeviceBridge for Adb {
    async fn start_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError> {
        Adb::start_daemon(self, intr).await
    }

    async fn kill_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError> {
        Adb::kill_daemon(self, intr).await
    }

    async fn select_device(
        &self,
        selector: &DeviceSelector,
        intr: &CancellationToken,
    ) -> Result<AdbDevice, AdbError> {
        Adb::select_device(self, selector, intr).await
    }

    async fn getprop(
        &self,
        serial: &str,
        prop: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        Adb::getprop(self, serial, prop, intr).await
    }

    async fn push(
        &self,
        serial: &str,
        local: &str,
        remote: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::push(self, serial, local, remote, intr).await
    }

    async fn enable_tcpip(
        &self,
        serial: &str,
        port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::enable_tcpip(self, serial, port, intr).await
    }

    async fn connect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError> {
        Adb::connect(self, addr, intr).await
    }

    async fn disconnect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError> {
        Adb::disconnect(self, addr, intr).await
    }

    async fn device_ip(
        &self,
        serial: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        Adb::device_ip(self, serial, intr).await
    }

    async fn forward(
        &self,
        serial: &str,
        local_port: u16,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::forward(self, serial, local_port, socket_name, intr).await
    }

    async fn forward_remove(
        &self,
        serial: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::forward_remove(self, serial, local_port, intr).await
    }

    async fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::reverse(self, serial, socket_name, local_port, intr).await
    }

    async fn reverse_remove(
        &self,
        serial: &str,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        Adb::reverse_remove(self, serial, socket_name, intr).await
    }

    fn spawn_agent(
        &self,
        serial: &str,
        shell_args: Vec<String>,
    ) -> Result<AgentProcess, AdbError> {
        Adb::spawn_agent(self, serial, shell_args)
    }
}
