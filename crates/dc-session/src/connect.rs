//! Connection establisher
//!
//! Establishes up to three logical channels (video, audio, control) over
//! the tunnel and performs the initial device-info handshake. Any
//! failure closes every socket opened so far and force-closes the
//! tunnel; no partially-initialized state escapes.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use dc_bridge::DeviceBridge;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::tunnel::Tunnel;
use crate::wait::sleep_unless_stopped;

/// Size of the device-info handshake block
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

/// Forward-mode connection retry budget
const FORWARD_CONNECT_ATTEMPTS: u32 = 100;
const FORWARD_CONNECT_DELAY: Duration = Duration::from_millis(100);

/// Device identity read from the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_name: String,
}

/// The per-feature channel sockets.
///
/// A socket is `None` exactly when its feature is disabled; dropping a
/// socket closes it.
#[derive(Debug, Default)]
pub struct SessionSockets {
    pub video: Option<TcpStream>,
    pub audio: Option<TcpStream>,
    pub control: Option<TcpStream>,
}

impl SessionSockets {
    /// The first enabled channel in priority order video, audio, control
    pub fn first_mut(&mut self) -> Option<&mut TcpStream> {
        self.video
            .as_mut()
            .or(self.audio.as_mut())
            .or(self.control.as_mut())
    }
}

/// Interpret a handshake block as a null-terminated device name.
///
/// The last byte is force-terminated in case the agent sends garbage.
pub fn parse_device_info(mut buf: [u8; DEVICE_NAME_FIELD_LENGTH]) -> DeviceInfo {
    buf[DEVICE_NAME_FIELD_LENGTH - 1] = 0;
    let len = buf.iter().position(|&b| b == 0).unwrap_or(0);
    DeviceInfo {
        device_name: String::from_utf8_lossy(&buf[..len]).into_owned(),
    }
}

/// Read the fixed-length device-info block from the first channel
async fn read_device_info(
    stream: &mut TcpStream,
    intr: &CancellationToken,
) -> Result<DeviceInfo, SessionError> {
    let mut buf = [0u8; DEVICE_NAME_FIELD_LENGTH];
    tokio::select! {
        res = stream.read_exact(&mut buf) => match res {
            Ok(_) => Ok(parse_device_info(buf)),
            Err(source) => Err(SessionError::DeviceInfo(source)),
        },
        () = intr.cancelled() => Err(SessionError::Interrupted),
    }
}

/// Accept one channel on the reverse-tunnel listener
async fn accept_channel(
    tunnel: &Tunnel,
    channel: &'static str,
    intr: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    let Some(listener) = tunnel.listener.as_ref() else {
        let source = std::io::Error::new(std::io::ErrorKind::NotConnected, "tunnel closed");
        return Err(SessionError::Accept { channel, source });
    };
    tokio::select! {
        res = listener.accept() => match res {
            Ok((stream, _)) => {
                tracing::debug!(channel, "Channel accepted");
                Ok(stream)
            }
            Err(source) => Err(SessionError::Accept { channel, source }),
        },
        () = intr.cancelled() => Err(SessionError::Interrupted),
    }
}

/// Connect one additional forward-mode channel (no ready-byte check)
async fn connect_channel(
    addr: SocketAddr,
    channel: &'static str,
    intr: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    tokio::select! {
        res = TcpStream::connect(addr) => match res {
            Ok(stream) => {
                tracing::debug!(channel, "Channel connected");
                Ok(stream)
            }
            Err(source) => Err(SessionError::Connect { channel, source }),
        },
        () = intr.cancelled() => Err(SessionError::Interrupted),
    }
}

/// One forward-mode attempt: connect, then read one byte.
///
/// The connect may succeed even when nothing is listening behind the
/// bridge relay, so a successful connect without a readable byte counts
/// as not-yet-ready.
async fn try_connect_once(
    addr: SocketAddr,
    intr: &CancellationToken,
) -> Result<Option<TcpStream>, SessionError> {
    let mut stream = tokio::select! {
        res = TcpStream::connect(addr) => match res {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!(%err, "Connect attempt failed");
                return Ok(None);
            }
        },
        () = intr.cancelled() => return Err(SessionError::Interrupted),
    };

    let mut byte = [0u8; 1];
    tokio::select! {
        res = stream.read(&mut byte) => match res {
            Ok(1) => Ok(Some(stream)),
            // The agent is not listening yet behind the relay
            _ => Ok(None),
        },
        () = intr.cancelled() => Err(SessionError::Interrupted),
    }
}

/// Bounded forward-mode connection loop
async fn connect_to_agent(
    addr: SocketAddr,
    attempts: u32,
    delay: Duration,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    let mut remaining = attempts;
    loop {
        tracing::debug!(remaining, "Remaining connection attempts");
        if let Some(stream) = try_connect_once(addr, intr).await? {
            return Ok(stream);
        }
        if intr.is_cancelled() {
            return Err(SessionError::Interrupted);
        }
        remaining -= 1;
        if remaining == 0 {
            return Err(SessionError::ConnectExhausted { attempts });
        }
        if !sleep_unless_stopped(stop, delay).await {
            tracing::debug!("Connection attempts stopped");
            return Err(SessionError::Interrupted);
        }
    }
}

/// Open every enabled channel, without touching the tunnel state.
///
/// On error, sockets opened so far are dropped (closed) on unwind.
async fn establish(
    tunnel: &Tunnel,
    video: bool,
    audio: bool,
    control: bool,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<SessionSockets, SessionError> {
    let mut sockets = SessionSockets::default();
    if !video && !audio && !control {
        return Ok(sockets);
    }

    if !tunnel.is_forward() {
        // The agent dials out one connection per enabled channel, in
        // the fixed order video, audio, control
        if video {
            sockets.video = Some(accept_channel(tunnel, "video", intr).await?);
        }
        if audio {
            sockets.audio = Some(accept_channel(tunnel, "audio", intr).await?);
        }
        if control {
            sockets.control = Some(accept_channel(tunnel, "control", intr).await?);
        }
    } else {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, tunnel.local_port()));
        let first = connect_to_agent(
            addr,
            FORWARD_CONNECT_ATTEMPTS,
            FORWARD_CONNECT_DELAY,
            stop,
            intr,
        )
        .await?;

        // The first established connection belongs to the first enabled
        // channel in priority order video, audio, control
        if video {
            sockets.video = Some(first);
        } else if audio {
            sockets.audio = Some(first);
        } else {
            sockets.control = Some(first);
        }

        if audio && sockets.audio.is_none() {
            sockets.audio = Some(connect_channel(addr, "audio", intr).await?);
        }
        if control && sockets.control.is_none() {
            sockets.control = Some(connect_channel(addr, "control", intr).await?);
        }
    }

    Ok(sockets)
}

/// Establish all enabled channels, tear the tunnel down, and read the
/// device-info handshake.
///
/// The tunnel is closed on success as soon as the channels exist (its
/// device-side endpoint is global named state) and on every failure
/// path.
pub async fn connect_all(
    bridge: &dyn DeviceBridge,
    serial: &str,
    tunnel: &mut Tunnel,
    video: bool,
    audio: bool,
    control: bool,
    stop: &CancellationToken,
    intr: &CancellationToken,
) -> Result<(SessionSockets, DeviceInfo), SessionError> {
    let result = establish(tunnel, video, audio, control, stop, intr).await;

    tunnel.close(bridge, serial, intr).await;

    let mut sockets = result?;
    let info = match sockets.first_mut() {
        Some(first) => read_device_info(first, intr).await?,
        None => DeviceInfo::default(),
    };

    Ok((sockets, info))
}
