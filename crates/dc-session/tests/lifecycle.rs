//! Session lifecycle integration tests
//!
//! Exercise the full stage sequence against a mock device bridge and
//! real localhost sockets: device selection, tunnel setup, agent
//! launch, channel establishment, handshake, and teardown under stop
//! and unsolicited agent death.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use dc_bridge::device::select_device;
use dc_bridge::{AdbDevice, AdbError, AgentProcess, DeviceBridge, DeviceSelector, DeviceState};
use dc_session::tcpip;
use dc_session::{
    Params, Session, SessionCallbacks, SessionError, SessionState, DEVICE_NAME_FIELD_LENGTH,
};

/// Point the deployment stage at an existing artifact, once per process
fn install_fake_artifact() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let path = std::env::temp_dir().join("devcast-test-agent.jar");
        std::fs::write(&path, b"fake agent").expect("write fake artifact");
        std::env::set_var("DEVCAST_AGENT_PATH", &path);
    });
}

fn info_block(name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; DEVICE_NAME_FIELD_LENGTH];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

fn device(serial: &str) -> AdbDevice {
    AdbDevice {
        serial: serial.to_string(),
        state: DeviceState::Device,
        model: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Connected,
    Failed,
    Disconnected,
}

struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
    connected: AtomicU32,
    failed: AtomicU32,
    disconnected: AtomicU32,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                connected: AtomicU32::new(0),
                failed: AtomicU32::new(0),
                disconnected: AtomicU32::new(0),
            }),
            rx,
        )
    }
}

impl SessionCallbacks for Recorder {
    fn on_connection_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Event::Failed);
    }

    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Event::Connected);
    }

    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Event::Disconnected);
    }
}

async fn expect_event(rx: &mut mpsc::UnboundedReceiver<Event>, expected: Event) {
    let event = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed");
    assert_eq!(event, expected);
}

/// Mock bridge: records every call and plays the device side of the
/// tunnel over real localhost sockets. The "agent process" is a plain
/// `sleep` child so the watcher has something real to wait on and kill.
struct MockBridge {
    devices: Vec<AdbDevice>,
    device_name: String,
    fail_reverse: bool,
    /// When false, the fake agent never dials/serves the channels
    serve_channels: bool,
    /// When false, `enable_tcpip` silently fails to take effect
    tcpip_switch_works: bool,

    /// Address reported by `device_ip`
    ip: Mutex<Option<String>>,
    /// Current value of the network debug port property
    tcp_port_prop: Mutex<Option<String>>,
    reverse_port: Mutex<Option<u16>>,
    forward_listener: Mutex<Option<TcpListener>>,
    agent_pid: Mutex<Option<u32>>,
    agent_args: Mutex<Vec<String>>,
    connects: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
    tunnel_removes: AtomicU32,
}

impl MockBridge {
    fn new(devices: Vec<AdbDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            device_name: "Test Device".to_string(),
            fail_reverse: false,
            serve_channels: true,
            tcpip_switch_works: true,
            ip: Mutex::new(Some("192.168.1.44".to_string())),
            tcp_port_prop: Mutex::new(None),
            reverse_port: Mutex::new(None),
            forward_listener: Mutex::new(None),
            agent_pid: Mutex::new(None),
            agent_args: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            tunnel_removes: AtomicU32::new(0),
        })
    }

    fn agent_pid(&self) -> Option<u32> {
        *self.agent_pid.lock().unwrap()
    }

    /// Play the device side: one dial-out (or accept) per enabled
    /// channel, the handshake block on the first one, then hold every
    /// connection open for as long as the fake agent lives.
    fn serve_device_side(&self, shell_args: &[String]) {
        let args = shell_args.to_vec();
        let info = info_block(&self.device_name);
        let forward = args.iter().any(|a| a == "tunnel_forward=true");
        let channels = ["video=false", "audio=false", "control=false"]
            .iter()
            .filter(|flag| !args.iter().any(|a| a == *flag))
            .count();
        let reverse_port = *self.reverse_port.lock().unwrap();
        let listener = self.forward_listener.lock().unwrap().take();

        tokio::spawn(async move {
            let mut held = Vec::new();
            for i in 0..channels {
                let mut stream = if forward {
                    let (stream, _) = listener.as_ref().unwrap().accept().await.unwrap();
                    stream
                } else {
                    TcpStream::connect(("127.0.0.1", reverse_port.unwrap()))
                        .await
                        .unwrap()
                };
                if i == 0 {
                    if forward {
                        // ready byte, read by the host's probe connect
                        stream.write_all(&[0]).await.unwrap();
                    }
                    stream.write_all(&info).await.unwrap();
                }
                held.push(stream);
            }
            // Keep the channels open until the test process ends
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(held);
        });
    }
}

#[async_trait]
impl DeviceBridge for MockBridge {
    async fn start_daemon(&self, _intr: &CancellationToken) -> Result<(), AdbError> {
        Ok(())
    }

    async fn kill_daemon(&self, _intr: &CancellationToken) -> Result<(), AdbError> {
        Ok(())
    }

    async fn select_device(
        &self,
        selector: &DeviceSelector,
        _intr: &CancellationToken,
    ) -> Result<AdbDevice, AdbError> {
        select_device(selector, self.devices.clone())
    }

    async fn getprop(
        &self,
        _serial: &str,
        prop: &str,
        _intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        if prop == "service.adb.tcp.port" {
            return Ok(self.tcp_port_prop.lock().unwrap().clone());
        }
        Ok(None)
    }

    async fn push(
        &self,
        _serial: &str,
        _local: &str,
        remote: &str,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        self.pushes.lock().unwrap().push(remote.to_string());
        Ok(())
    }

    async fn enable_tcpip(
        &self,
        _serial: &str,
        port: u16,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        if self.tcpip_switch_works {
            *self.tcp_port_prop.lock().unwrap() = Some(port.to_string());
        }
        Ok(())
    }

    async fn connect(&self, addr: &str, _intr: &CancellationToken) -> Result<(), AdbError> {
        self.connects.lock().unwrap().push(addr.to_string());
        Ok(())
    }

    async fn disconnect(&self, _addr: &str, _intr: &CancellationToken) -> Result<(), AdbError> {
        Ok(())
    }

    async fn device_ip(
        &self,
        _serial: &str,
        _intr: &CancellationToken,
    ) -> Result<Option<String>, AdbError> {
        Ok(self.ip.lock().unwrap().clone())
    }

    async fn forward(
        &self,
        _serial: &str,
        local_port: u16,
        _socket_name: &str,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        // Bind the relay endpoint the host will dial; a taken port is
        // reported as a failure so the manager moves down the range
        match TcpListener::bind(("127.0.0.1", local_port)).await {
            Ok(listener) => {
                *self.forward_listener.lock().unwrap() = Some(listener);
                Ok(())
            }
            Err(err) => Err(AdbError::CommandFailed {
                command: format!("forward tcp:{local_port}"),
                message: err.to_string(),
            }),
        }
    }

    async fn forward_remove(
        &self,
        _serial: &str,
        _local_port: u16,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        self.tunnel_removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reverse(
        &self,
        _serial: &str,
        _socket_name: &str,
        local_port: u16,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        if self.fail_reverse {
            return Err(AdbError::CommandFailed {
                command: "reverse".to_string(),
                message: "adbd does not support reverse".to_string(),
            });
        }
        *self.reverse_port.lock().unwrap() = Some(local_port);
        Ok(())
    }

    async fn reverse_remove(
        &self,
        _serial: &str,
        _socket_name: &str,
        _intr: &CancellationToken,
    ) -> Result<(), AdbError> {
        self.tunnel_removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_agent(
        &self,
        _serial: &str,
        shell_args: Vec<String>,
    ) -> Result<AgentProcess, AdbError> {
        let child = tokio::process::Command::new("sleep")
            .arg("600")
            .spawn()
            .map_err(|source| AdbError::Spawn {
                command: "sleep 600".to_string(),
                source,
            })?;
        *self.agent_pid.lock().unwrap() = child.id();
        *self.agent_args.lock().unwrap() = shell_args.clone();
        if self.serve_channels {
            self.serve_device_side(&shell_args);
        }
        Ok(AgentProcess::new(child))
    }
}

fn params_for(serial: &str) -> Params {
    Params {
        req_serial: Some(serial.to_string()),
        ..Params::default()
    }
}

#[tokio::test]
async fn reverse_session_connects_and_stops_cleanly() {
    install_fake_artifact();
    let bridge = MockBridge::new(vec![device("emulator-5554")]);
    let (callbacks, mut events) = Recorder::new();

    let session = Session::new(
        bridge.clone(),
        &params_for("emulator-5554"),
        callbacks.clone(),
    );
    session.start();

    expect_event(&mut events, Event::Connected).await;
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.serial().as_deref(), Some("emulator-5554"));
    assert_eq!(
        session.device_info().unwrap().device_name,
        "Test Device"
    );

    let sockets = session.take_sockets().expect("sockets available");
    assert!(sockets.video.is_some());
    assert!(sockets.audio.is_some());
    assert!(sockets.control.is_some());

    session.stop();
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");

    expect_event(&mut events, Event::Disconnected).await;
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(callbacks.connected.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.failed.load(Ordering::SeqCst), 0);
    assert_eq!(callbacks.disconnected.load(Ordering::SeqCst), 1);

    // The tunnel was torn down right after establishment, not at stop
    assert_eq!(bridge.tunnel_removes.load(Ordering::SeqCst), 1);
    assert_eq!(
        bridge.pushes.lock().unwrap().as_slice(),
        ["/data/local/tmp/devcast-agent.jar"]
    );
}

#[tokio::test]
async fn session_fails_when_no_device_matches() {
    install_fake_artifact();
    let bridge = MockBridge::new(Vec::new());
    let (callbacks, mut events) = Recorder::new();

    let session = Session::new(bridge, &params_for("emulator-5554"), callbacks.clone());
    session.start();

    expect_event(&mut events, Event::Failed).await;
    session.join().await;

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(callbacks.connected.load(Ordering::SeqCst), 0);
    assert_eq!(callbacks.failed.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.disconnected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn forward_fallback_when_reverse_unavailable() {
    install_fake_artifact();
    let mut bridge = MockBridge::new(vec![device("emulator-5554")]);
    Arc::get_mut(&mut bridge).unwrap().fail_reverse = true;
    let (callbacks, mut events) = Recorder::new();

    let session = Session::new(
        bridge.clone(),
        &params_for("emulator-5554"),
        callbacks.clone(),
    );
    session.start();

    expect_event(&mut events, Event::Connected).await;

    // The agent was told the tunnel direction changed
    assert!(bridge
        .agent_args
        .lock()
        .unwrap()
        .iter()
        .any(|a| a == "tunnel_forward=true"));

    let sockets = session.take_sockets().expect("sockets available");
    assert!(sockets.video.is_some());
    assert!(sockets.audio.is_some());
    assert!(sockets.control.is_some());

    session.stop();
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");
    expect_event(&mut events, Event::Disconnected).await;
}

#[tokio::test]
async fn external_agent_death_fires_disconnected_once_and_unblocks_reads() {
    install_fake_artifact();
    let bridge = MockBridge::new(vec![device("emulator-5554")]);
    let (callbacks, mut events) = Recorder::new();

    let session = Session::new(
        bridge.clone(),
        &params_for("emulator-5554"),
        callbacks.clone(),
    );
    session.start();
    expect_event(&mut events, Event::Connected).await;

    let mut sockets = session.take_sockets().expect("sockets available");
    let intr = session.interrupted();
    let consumer = tokio::spawn(async move {
        let video = sockets.video.as_mut().unwrap();
        let mut buf = [0u8; 1];
        tokio::select! {
            _ = video.read(&mut buf) => "read",
            () = intr.cancelled() => "interrupted",
        }
    });

    // Kill the agent behind the session's back
    let pid = bridge.agent_pid().expect("agent pid");
    let status = std::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .expect("kill");
    assert!(status.success());

    expect_event(&mut events, Event::Disconnected).await;
    let woken = timeout(Duration::from_secs(10), consumer)
        .await
        .expect("consumer stayed blocked")
        .unwrap();
    assert_eq!(woken, "interrupted");

    session.stop();
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");
    assert_eq!(callbacks.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn known_address_is_normalized_and_used_as_identity() {
    install_fake_artifact();
    let bridge = MockBridge::new(Vec::new());
    let (callbacks, mut events) = Recorder::new();

    let params = Params {
        tcpip: true,
        tcpip_dst: Some("192.168.1.10".to_string()),
        ..Params::default()
    };
    let session = Session::new(bridge.clone(), &params, callbacks.clone());
    session.start();

    expect_event(&mut events, Event::Connected).await;
    assert_eq!(session.serial().as_deref(), Some("192.168.1.10:5555"));
    assert_eq!(
        bridge.connects.lock().unwrap().as_slice(),
        ["192.168.1.10:5555"]
    );

    session.stop();
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");
}

#[tokio::test]
async fn wireless_switch_resolves_ip_port_identity() {
    install_fake_artifact();
    let bridge = MockBridge::new(vec![device("emulator-5554")]);
    let (callbacks, mut events) = Recorder::new();

    // USB-attached device, migrated to network transport first
    let params = Params {
        tcpip: true,
        ..params_for("emulator-5554")
    };
    let session = Session::new(bridge.clone(), &params, callbacks.clone());
    session.start();

    expect_event(&mut events, Event::Connected).await;
    assert_eq!(session.serial().as_deref(), Some("192.168.1.44:5555"));
    assert_eq!(
        bridge.connects.lock().unwrap().as_slice(),
        ["192.168.1.44:5555"]
    );
    // The new address is the identity for every later bridge call
    assert_eq!(
        bridge.pushes.lock().unwrap().as_slice(),
        ["/data/local/tmp/devcast-agent.jar"]
    );

    session.stop();
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");
    expect_event(&mut events, Event::Disconnected).await;
}

#[tokio::test(start_paused = true)]
async fn tcp_mode_poll_exhaustion_times_out() {
    let mut bridge = MockBridge::new(vec![device("emulator-5554")]);
    // The property never reflects the enable request
    Arc::get_mut(&mut bridge).unwrap().tcpip_switch_works = false;

    let stop = CancellationToken::new();
    let intr = CancellationToken::new();
    let err = tcpip::configure_unknown_address(&*bridge, "emulator-5554", &stop, &intr)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TcpModeTimeout));
}

#[tokio::test]
async fn unknown_device_address_is_an_error() {
    let bridge = MockBridge::new(vec![device("emulator-5554")]);
    *bridge.ip.lock().unwrap() = None;

    let stop = CancellationToken::new();
    let intr = CancellationToken::new();
    let err = tcpip::configure_unknown_address(&*bridge, "emulator-5554", &stop, &intr)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::IpNotFound));
}

#[tokio::test]
async fn switch_failure_reports_connection_failed() {
    install_fake_artifact();
    let mut bridge = MockBridge::new(vec![device("emulator-5554")]);
    Arc::get_mut(&mut bridge).unwrap().ip = Mutex::new(None);
    let (callbacks, mut events) = Recorder::new();

    let params = Params {
        tcpip: true,
        ..params_for("emulator-5554")
    };
    let session = Session::new(bridge, &params, callbacks.clone());
    session.start();

    expect_event(&mut events, Event::Failed).await;
    session.join().await;

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(callbacks.failed.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_during_connecting_aborts_promptly() {
    install_fake_artifact();
    let mut bridge = MockBridge::new(vec![device("emulator-5554")]);
    // The fake agent never serves its channels: the session blocks in accept
    Arc::get_mut(&mut bridge).unwrap().serve_channels = false;
    let (callbacks, mut events) = Recorder::new();

    let session = Session::new(bridge, &params_for("emulator-5554"), callbacks.clone());
    session.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();

    expect_event(&mut events, Event::Failed).await;
    timeout(Duration::from_secs(10), session.join())
        .await
        .expect("join timed out");

    assert_eq!(callbacks.failed.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.disconnected.load(Ordering::SeqCst), 0);
}
