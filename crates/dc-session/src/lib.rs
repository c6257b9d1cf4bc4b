//! dc-session: agent launch and connection orchestration for devcast
//!
//! Resolves a device, optionally migrates it to network transport,
//! deploys the agent, opens a tunnel, launches the agent process, and
//! establishes the video/audio/control channels — then supervises the
//! agent's lifetime under concurrent stop/interrupt requests.

pub mod connect;
pub mod deploy;
pub mod error;
pub mod launcher;
pub mod params;
pub mod session;
pub mod tcpip;
pub mod tunnel;
pub mod wait;

pub use connect::{DeviceInfo, SessionSockets, DEVICE_NAME_FIELD_LENGTH};
pub use error::SessionError;
pub use params::{
    AudioSource, CameraPosition, Codec, LogLevel, Params, PortRange, VideoSource,
};
pub use session::{Session, SessionCallbacks, SessionState};
