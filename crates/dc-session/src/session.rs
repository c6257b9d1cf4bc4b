//! Lifecycle controller
//!
//! Drives the full stage sequence on a single background task: device
//! selection, optional wireless-mode switch, deployment, tunnel setup,
//! agent launch, connection establishment, then the steady connected
//! state until a stop request or the agent dies. A second task watches
//! the agent process and recognizes unsolicited termination.
//!
//! Lifecycle is one-shot: `new` → `start` → `stop` → `join`. `stop` may
//! be called from any task at any time; every blocking stage wakes
//! early instead of running to its nominal deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dc_bridge::{AdbError, AgentProcess, DeviceBridge, DeviceSelector};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connect::{self, DeviceInfo, SessionSockets};
use crate::deploy;
use crate::error::SessionError;
use crate::launcher;
use crate::params::Params;
use crate::tcpip;
use crate::tunnel::Tunnel;

/// Environment fallback for device selection
pub const SERIAL_ENV: &str = "ANDROID_SERIAL";

/// How long a stopped agent gets to exit on its own before being killed
const AGENT_EXIT_GRACE: Duration = Duration::from_secs(1);

/// Session lifecycle notifications.
///
/// Exactly one of `on_connected` / `on_connection_failed` fires per
/// session; `on_disconnected` fires exactly once after a connected
/// session ends, whether from an orderly stop or the agent dying on its
/// own. The expected reaction to `on_disconnected` is to call
/// [`Session::stop`] and [`Session::join`].
pub trait SessionCallbacks: Send + Sync + 'static {
    fn on_connection_failed(&self);
    fn on_connected(&self);
    fn on_disconnected(&self);
}

/// Observable stage of the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum SessionState {
    Idle,
    SelectingDevice,
    SwitchingTransport,
    Deploying,
    OpeningTunnel,
    Launching,
    Connecting,
    Connected,
    Stopping,
    Terminated,
    Failed,
}

struct Shared {
    bridge: Arc<dyn DeviceBridge>,
    params: Params,
    callbacks: Arc<dyn SessionCallbacks>,

    /// Set only by `stop`; steady-state wait and bounded sleeps watch it
    stop: CancellationToken,
    /// Wakes every blocking network/bridge call; set by `stop` and by
    /// the watcher when the agent dies
    intr: CancellationToken,
    /// Worker → watcher: begin the grace window (or immediate kill)
    shutdown: CancellationToken,
    immediate_kill: AtomicBool,

    /// Set by the watcher before it consults the state, so the worker
    /// can detect an agent death that raced connection establishment
    agent_exited: AtomicBool,
    disconnect_fired: AtomicBool,

    state: Mutex<SessionState>,
    serial: Mutex<Option<String>>,
    device_info: Mutex<Option<DeviceInfo>>,
    sockets: Mutex<Option<SessionSockets>>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
        tracing::trace!(?state, "Session state");
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Fire `on_disconnected` if (and only if) the session reached the
    /// connected state, at most once.
    fn notify_disconnected(&self) {
        let state = self.state();
        let connected = matches!(
            state,
            SessionState::Connected | SessionState::Stopping | SessionState::Terminated
        );
        if connected && !self.disconnect_fired.swap(true, Ordering::SeqCst) {
            self.callbacks.on_disconnected();
        }
    }
}

/// A one-shot agent session
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session over the given bridge.
    ///
    /// The parameters are deep-copied; the caller's record may be
    /// dropped or mutated immediately after this returns.
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        params: &Params,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Self {
        let stop = CancellationToken::new();
        Self {
            shared: Arc::new(Shared {
                bridge,
                params: params.clone(),
                callbacks,
                stop,
                intr: CancellationToken::new(),
                shutdown: CancellationToken::new(),
                immediate_kill: AtomicBool::new(false),
                agent_exited: AtomicBool::new(false),
                disconnect_fired: AtomicBool::new(false),
                state: Mutex::new(SessionState::Idle),
                serial: Mutex::new(None),
                device_info: Mutex::new(None),
                sockets: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background worker running the full stage sequence.
    ///
    /// Must be called at most once, from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.worker.lock().unwrap();
        if slot.is_some() {
            tracing::warn!("Session already started");
            return;
        }
        *slot = Some(tokio::spawn(run(Arc::clone(&self.shared))));
    }

    /// Request termination.
    ///
    /// Callable from any task at any time; wakes every in-flight
    /// blocking call so no stage hangs until an OS-level timeout. Safe
    /// to call more than once.
    pub fn stop(&self) {
        self.shared.stop.cancel();
        self.shared.intr.cancel();
    }

    /// Wait until the worker (and the process watcher) have fully exited
    pub async fn join(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "Session worker panicked");
            }
        }
    }

    /// Current state machine stage
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Resolved device identity, available once selection completed
    pub fn serial(&self) -> Option<String> {
        self.shared.serial.lock().unwrap().clone()
    }

    /// Device info from the handshake, available once connected
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device_info.lock().unwrap().clone()
    }

    /// Take ownership of the channel sockets after `on_connected`.
    ///
    /// Consumers should pair blocking reads with [`Session::interrupted`]
    /// so a stop request or agent death wakes them.
    pub fn take_sockets(&self) -> Option<SessionSockets> {
        self.shared.sockets.lock().unwrap().take()
    }

    /// Token cancelled on stop and on agent death
    pub fn interrupted(&self) -> CancellationToken {
        self.shared.intr.clone()
    }
}

/// Derive the device selector from the parameters, falling back to the
/// process environment
fn device_selector(params: &Params) -> DeviceSelector {
    if let Some(serial) = &params.req_serial {
        return DeviceSelector::Serial(serial.clone());
    }
    if params.select_usb {
        return DeviceSelector::Usb;
    }
    if params.select_tcpip {
        return DeviceSelector::Tcpip;
    }
    match std::env::var(SERIAL_ENV) {
        Ok(serial) if !serial.is_empty() => {
            tracing::info!(%serial, "Using ANDROID_SERIAL");
            DeviceSelector::Serial(serial)
        }
        _ => DeviceSelector::Any,
    }
}

async fn kill_daemon_if_requested(shared: &Shared) {
    if shared.params.kill_bridge_on_close {
        tracing::info!("Killing bridge daemon...");
        if let Err(err) = shared.bridge.kill_daemon(&shared.intr).await {
            tracing::warn!(%err, "Could not kill bridge daemon");
        }
    }
}

enum Outcome {
    /// List-only query: the agent printed its listing and exited
    ListQuery,
    /// Steady state reached; the watcher owns the agent process
    Connected { watcher: JoinHandle<()> },
}

async fn run(shared: Arc<Shared>) {
    match run_stages(&shared).await {
        Ok(Outcome::ListQuery) => {
            shared.set_state(SessionState::Terminated);
            // Wake the caller's wait
            shared.callbacks.on_connected();
        }
        Ok(Outcome::Connected { watcher }) => {
            shared.set_state(SessionState::Connected);
            shared.callbacks.on_connected();

            // The agent may have died between establishment and this
            // point; the watcher alone could have missed it
            if shared.agent_exited.load(Ordering::SeqCst) {
                shared.notify_disconnected();
            }

            shared.stop.cancelled().await;
            shared.set_state(SessionState::Stopping);

            // Close the sockets the session still holds so any consumer
            // blocked on them gets woken
            drop(shared.sockets.lock().unwrap().take());

            shared.shutdown.cancel();
            if let Err(err) = watcher.await {
                tracing::warn!(%err, "Agent watcher panicked");
            }

            kill_daemon_if_requested(&shared).await;
            shared.set_state(SessionState::Terminated);
        }
        Err(err) => {
            if err.is_interrupted() {
                tracing::debug!("Session startup interrupted");
            } else {
                tracing::error!(error = %format_chain(&err), "Could not start session");
            }
            kill_daemon_if_requested(&shared).await;
            shared.set_state(SessionState::Failed);
            shared.callbacks.on_connection_failed();
        }
    }
}

/// Render an error with its source chain for a single log line
fn format_chain(err: &SessionError) -> String {
    let mut s = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        s.push_str(": ");
        s.push_str(&cause.to_string());
        source = cause.source();
    }
    s
}

async fn run_stages(shared: &Arc<Shared>) -> Result<Outcome, SessionError> {
    let bridge = shared.bridge.as_ref();
    let params = &shared.params;
    let stop = &shared.stop;
    let intr = &shared.intr;

    // Start the daemon before the first listing query so its startup
    // output reaches the console instead of being parsed away
    bridge.start_daemon(intr).await?;

    let serial = if let Some(dst) = &params.tcpip_dst {
        // The device may not be attached yet; the address itself is the
        // identity to establish
        shared.set_state(SessionState::SwitchingTransport);
        tcpip::configure_known_address(bridge, dst, intr).await?
    } else {
        shared.set_state(SessionState::SelectingDevice);
        let selector = device_selector(params);
        let device = bridge
            .select_device(&selector, intr)
            .await
            .map_err(|err| match err {
                AdbError::Interrupted => SessionError::Interrupted,
                other => SessionError::DeviceResolution(other),
            })?;

        if params.tcpip {
            shared.set_state(SessionState::SwitchingTransport);
            tcpip::configure_unknown_address(bridge, &device.serial, stop, intr).await?
        } else {
            device.serial
        }
    };

    tracing::debug!(%serial, "Device serial resolved");
    *shared.serial.lock().unwrap() = Some(serial.clone());

    shared.set_state(SessionState::Deploying);
    deploy::push_agent(bridge, &serial, intr).await?;

    if params.is_list_query() {
        // The agent just prints the requested listing and exits
        shared.set_state(SessionState::Launching);
        let mut process = launcher::launch_agent(bridge, &serial, params, false)?;
        let interrupted = tokio::select! {
            _ = process.wait() => false,
            () = intr.cancelled() => true,
        };
        if interrupted {
            let _ = process.start_kill();
            let _ = process.wait().await;
            return Err(SessionError::Interrupted);
        }
        return Ok(Outcome::ListQuery);
    }

    shared.set_state(SessionState::OpeningTunnel);
    let mut tunnel = Tunnel::open(
        bridge,
        &serial,
        params.scid,
        params.port_range,
        params.force_tunnel_forward,
        intr,
    )
    .await?;

    shared.set_state(SessionState::Launching);
    let process = match launcher::launch_agent(bridge, &serial, params, tunnel.is_forward()) {
        Ok(process) => process,
        Err(err) => {
            tunnel.close(bridge, &serial, intr).await;
            return Err(err);
        }
    };

    let watcher = tokio::spawn(watch_agent(Arc::clone(shared), process));

    shared.set_state(SessionState::Connecting);
    match connect::connect_all(
        bridge,
        &serial,
        &mut tunnel,
        params.video,
        params.audio,
        params.control,
        stop,
        intr,
    )
    .await
    {
        // connect_all always leaves the tunnel closed
        Ok((sockets, info)) => {
            tracing::info!(device_name = %info.device_name, "Agent connected");
            *shared.device_info.lock().unwrap() = Some(info);
            *shared.sockets.lock().unwrap() = Some(sockets);
            Ok(Outcome::Connected { watcher })
        }
        Err(err) => {
            shared.immediate_kill.store(true, Ordering::SeqCst);
            shared.shutdown.cancel();
            if let Err(join_err) = watcher.await {
                tracing::warn!(%join_err, "Agent watcher panicked");
            }
            Err(err)
        }
    }
}

/// Watch the agent process until it exits.
///
/// Recognizes unsolicited termination at any time: the interrupt token
/// is triggered so nothing stays blocked on a socket the agent will
/// never serve, and the disconnection callback fires if the session was
/// connected. On shutdown, grants the grace window before killing.
async fn watch_agent(shared: Arc<Shared>, mut process: AgentProcess) {
    let exited = tokio::select! {
        status = process.wait() => {
            match status {
                Ok(status) => tracing::debug!(%status, "Agent exited"),
                Err(err) => tracing::warn!(%err, "Could not wait for agent"),
            }
            true
        }
        () = shared.shutdown.cancelled() => false,
    };

    if !exited {
        if shared.immediate_kill.load(Ordering::SeqCst) {
            let _ = process.start_kill();
            let _ = process.wait().await;
        } else {
            // Closing the sockets is not always sufficient to wake the
            // agent's blocking calls while the device is asleep
            match tokio::time::timeout(AGENT_EXIT_GRACE, process.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Killing the agent...");
                    let _ = process.start_kill();
                    let _ = process.wait().await;
                }
            }
        }
    }

    shared.agent_exited.store(true, Ordering::SeqCst);

    // Wake up any blocked accept/connect/read; safe to trigger twice
    shared.intr.cancel();

    shared.notify_disconnected();
    tracing::debug!("Agent terminated");
}
