//! Handle to a launched agent process

use std::process::ExitStatus;

use tokio::process::Child;

/// A live agent process launched through the bridge.
///
/// Wraps the child so the session can wait for or terminate it without
/// caring how it was spawned (real bridge or a test double).
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
}

impl AgentProcess {
    /// Wrap an already-spawned child
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// OS process id, when still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Request termination without waiting for it to complete
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}
