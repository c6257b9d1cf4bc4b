//! Agent deployment
//!
//! Resolves the local agent artifact and pushes it to its fixed location
//! on the device. Failures here are fatal for the session; there is no
//! retry.

use std::path::{Path, PathBuf};

use dc_bridge::{AdbError, DeviceBridge};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

/// Fixed absolute path of the agent on the device
pub const DEVICE_AGENT_PATH: &str = "/data/local/tmp/devcast-agent.jar";

/// Artifact file name
pub const AGENT_FILENAME: &str = "devcast-agent.jar";

/// Environment variable overriding the artifact location
pub const AGENT_PATH_ENV: &str = "DEVCAST_AGENT_PATH";

/// Installed artifact location
const AGENT_INSTALL_PATH: &str = "/usr/local/share/devcast/devcast-agent.jar";

/// Resolve the local artifact path: explicit override first, then the
/// installed location, then next to the running executable.
fn resolve_agent_path(env_override: Option<PathBuf>) -> PathBuf {
    if let Some(path) = env_override {
        tracing::debug!(path = %path.display(), "Using agent path override");
        return path;
    }

    let installed = PathBuf::from(AGENT_INSTALL_PATH);
    if installed.is_file() {
        return installed;
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(AGENT_FILENAME)))
        .unwrap_or_else(|| PathBuf::from(AGENT_FILENAME))
}

/// The artifact must exist and be a regular file
fn check_artifact(path: &Path) -> Result<(), SessionError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(SessionError::ArtifactNotFound(path.to_path_buf())),
    }
}

/// Push the agent artifact to the device
pub async fn push_agent(
    bridge: &dyn DeviceBridge,
    serial: &str,
    intr: &CancellationToken,
) -> Result<(), SessionError> {
    let path = resolve_agent_path(std::env::var_os(AGENT_PATH_ENV).map(PathBuf::from));
    check_artifact(&path)?;

    tracing::debug!(local = %path.display(), remote = DEVICE_AGENT_PATH, "Pushing agent");
    let local = path.to_string_lossy();
    bridge
        .push(serial, &local, DEVICE_AGENT_PATH, intr)
        .await
        .map_err(|err| match err {
            AdbError::Interrupted => SessionError::Interrupted,
            other => SessionError::PushFailed(other),
        })
}
