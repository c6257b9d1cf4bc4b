//! Thin wrapper around the `adb` command-line tool
//!
//! Every invocation is interruptible: commands are spawned with
//! `kill_on_drop` and awaited under a `CancellationToken`, so a stop
//! request never waits for a wedged bridge daemon.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::device::{parse_device_list, select_device, AdbDevice, DeviceSelector};
use crate::error::AdbError;
use crate::process::AgentProcess;

/// Environment variable overriding the bridge executable
pub const ADB_ENV: &str = "ADB";

/// Handle to the bridge executable
#[derive(Debug, Clone)]
pub struct Adb {
    executable: String,
}

impl Adb {
    /// Resolve the bridge executable from `$ADB`, falling back to `adb`
    pub fn new() -> Self {
        let executable = std::env::var(ADB_ENV).unwrap_or_else(|_| "adb".to_string());
        Self { executable }
    }

    /// Use an explicit executable path
    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// The resolved executable name
    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args);
        // Dropping the wait future (on interrupt) must not leave the
        // bridge client running
        cmd.kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut s = self.executable.clone();
        for arg in args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }

    /// Run a bridge command, capturing stdout
    async fn exec(&self, args: &[&str], intr: &CancellationToken) -> Result<String, AdbError> {
        tracing::debug!(command = %self.describe(args), "Executing bridge command");
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|source| AdbError::Spawn {
            command: self.describe(args),
            source,
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            () = intr.cancelled() => return Err(AdbError::Interrupted),
        };

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AdbError::CommandFailed {
                command: self.describe(args),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a bridge command with inherited stdio.
    ///
    /// Used for `start-server` so daemon startup messages reach the
    /// console instead of being swallowed.
    async fn exec_inherit(&self, args: &[&str], intr: &CancellationToken) -> Result<(), AdbError> {
        tracing::debug!(command = %self.describe(args), "Executing bridge command");
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| AdbError::Spawn {
            command: self.describe(args),
            source,
        })?;

        let status = tokio::select! {
            status = child.wait() => status?,
            () = intr.cancelled() => return Err(AdbError::Interrupted),
        };

        if !status.success() {
            return Err(AdbError::CommandFailed {
                command: self.describe(args),
                message: format!("exit status {status}"),
            });
        }
        Ok(())
    }

    /// `adb start-server`
    pub async fn start_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError> {
        self.exec_inherit(&["start-server"], intr).await
    }

    /// `adb kill-server` (best effort, failures logged only)
    pub async fn kill_daemon(&self, intr: &CancellationToken) -> Result<(), AdbError> {
        self.exec(&["kill-server"], intr).await.map(|_| ())
    }

    /// `adb devices -l`, parsed
    pub async fn devices(&self, intr: &CancellationToken) -> Result<Vec<AdbDevice>, AdbError> {
        let output = self.exec(&["devices", "-l"], intr).await?;
        Ok(parse_device_list(&output))
    }

    /// Resolve a selector to exactly one usable device
    pub async fn select_device(
        &self,
        selector: &DeviceSelector,
        intr: &CancellationToken,
    ) -> Result<AdbDevice, AdbError> {
        let devices = self.devices(intr).await?;
        select_device(selector, devices)
    }

    /// `adb -s <serial> shell getprop <prop>`.
    ///
    /// Returns `None` on failure or an empty value; this is used for
    /// polling, so failures are silent.
    pub async fn getprop(
        &self,
        serial: &str,
        prop: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        match self
            .exec(&["-s", serial, "shell", "getprop", prop], intr)
            .await
        {
            Ok(output) => {
                let value = output.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(AdbError::Interrupted) => Err(AdbError::Interrupted),
            Err(err) => {
                tracing::debug!(%prop, %err, "getprop failed");
                Ok(None)
            }
        }
    }

    /// `adb -s <serial> push <local> <remote>`
    pub async fn push(
        &self,
        serial: &str,
        local: &str,
        remote: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        self.exec(&["-s", serial, "push", local, remote], intr)
            .await
            .map(|_| ())
    }

    /// `adb -s <serial> tcpip <port>` (restart adbd listening on TCP/IP)
    pub async fn enable_tcpip(
        &self,
        serial: &str,
        port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        let port = port.to_string();
        self.exec(&["-s", serial, "tcpip", &port], intr)
            .await
            .map(|_| ())
    }

    /// `adb connect <addr>`.
    ///
    /// adb prints connection failures on stdout with a zero exit status,
    /// so the output text must be checked as well.
    pub async fn connect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError> {
        let output = self.exec(&["connect", addr], intr).await?;
        let line = output.trim();
        if line.starts_with("connected to") || line.starts_with("already connected") {
            Ok(())
        } else {
            Err(AdbError::CommandFailed {
                command: self.describe(&["connect", addr]),
                message: line.to_string(),
            })
        }
    }

    /// `adb disconnect <addr>` (an error is expected when not connected)
    pub async fn disconnect(&self, addr: &str, intr: &CancellationToken) -> Result<(), AdbError> {
        self.exec(&["disconnect", addr], intr).await.map(|_| ())
    }

    /// `adb -s <serial> forward tcp:<port> localabstract:<name>`
    pub async fn forward(
        &self,
        serial: &str,
        local_port: u16,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        let local = format!("tcp:{local_port}");
        let remote = format!("localabstract:{socket_name}");
        self.exec(&["-s", serial, "forward", &local, &remote], intr)
            .await
            .map(|_| ())
    }

    /// `adb -s <serial> forward --remove tcp:<port>`
    pub async fn forward_remove(
        &self,
        serial: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        let local = format!("tcp:{local_port}");
        self.exec(&["-s", serial, "forward", "--remove", &local], intr)
            .await
            .map(|_| ())
    }

    /// `adb -s <serial> reverse localabstract:<name> tcp:<port>`
    pub async fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        let remote = format!("localabstract:{socket_name}");
        let local = format!("tcp:{local_port}");
        self.exec(&["-s", serial, "reverse", &remote, &local], intr)
            .await
            .map(|_| ())
    }

    /// `adb -s <serial> reverse --remove localabstract:<name>`
    pub async fn reverse_remove(
        &self,
        serial: &str,
        socket_name: &str,
        intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        let remote = format!("localabstract:{socket_name}");
        self.exec(&["-s", serial, "reverse", "--remove", &remote], intr)
            .await
            .map(|_| ())
    }

    /// Query the device's own network address via `ip route`
    pub async fn device_ip(
        &self,
        serial: &str,
        intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        let output = self.exec(&["-s", serial, "shell", "ip", "route"], intr).await?;
        Ok(parse_ip_route(&output))
    }

    /// Launch the agent process on the device with inherited stdio.
    ///
    /// The agent writes its own logs to stdout/stderr; they belong on the
    /// caller's console.
    pub fn spawn_agent(
        &self,
        serial: &str,
        shell_args: Vec<String>,
    ) -> Result<AgentProcess, AdbError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-s").arg(serial).arg("shell").args(&shell_args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        tracing::debug!(%serial, args = ?shell_args, "Launching agent");
        let child = cmd.spawn().map_err(|source| AdbError::Spawn {
            command: self.describe(&["-s", serial, "shell", "..."]),
            source,
        })?;
        Ok(AgentProcess::new(child))
    }
}

impl Default for Adb {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the device's source address from `ip route` output.
///
/// Lines look like
/// `192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.10`.
/// A wlan interface is preferred when several routes carry a source.
pub fn parse_ip_route(output: &str) -> Option<String> {
    let mut fallback = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let dev = fields
            .iter()
            .position(|f| *f == "dev")
            .and_then(|i| fields.get(i + 1));
        let src = fields
            .iter()
            .position(|f| *f == "src")
            .and_then(|i| fields.get(i + 1));
        if let (Some(dev), Some(src)) = (dev, src) {
            if dev.starts_with("wlan") {
                return Some((*src).to_string());
            }
            fallback.get_or_insert_with(|| (*src).to_string());
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_route_prefers_wlan_interface() {
        let output = "\
10.0.2.0/24 dev radio0 proto kernel scope link src 10.0.2.16\n\
192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.10\n";
        assert_eq!(parse_ip_route(output).as_deref(), Some("192.168.1.10"));
    }

    #[test]
    fn ip_route_falls_back_to_any_source() {
        let output = "10.0.2.0/24 dev eth0 proto kernel scope link src 10.0.2.16\n";
        assert_eq!(parse_ip_route(output).as_deref(), Some("10.0.2.16"));
    }

    #[test]
    fn ip_route_without_source_yields_none() {
        let output = "default via 10.0.2.1 dev eth0\n";
        assert_eq!(parse_ip_route(output), None);
    }
}
