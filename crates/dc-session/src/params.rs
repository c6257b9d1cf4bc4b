//! Launch parameters
//!
//! A flat, fully-owned record of every option the session needs. The
//! session clones the caller's record at construction time, so the
//! caller may drop or mutate its copy immediately afterwards.

use rand::Rng;

/// Log verbosity forwarded to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Wire name used in the agent argument protocol
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Media codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    Av1,
    Opus,
    Aac,
    Raw,
}

impl Codec {
    /// Wire name used in the agent argument protocol
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Raw => "raw",
        }
    }
}

/// What the video channel captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Display,
    Camera,
}

/// What the audio channel captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    Output,
    Mic,
}

/// Camera facing selection, only meaningful with `VideoSource::Camera`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPosition {
    /// No constraint (default, never emitted)
    All,
    Front,
    Back,
    External,
}

impl CameraPosition {
    /// Wire name, `None` for the unconstrained default
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Front => Some("front"),
            Self::Back => Some("back"),
            Self::External => Some("external"),
        }
    }
}

/// Inclusive local port range for forward-tunnel binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    /// Iterate over every port in the range
    pub fn iter(self) -> impl Iterator<Item = u16> {
        self.first..=self.last
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            first: 27183,
            last: 27199,
        }
    }
}

/// All launch options, owned by the session after one deep copy.
///
/// `Clone` is the deep copy: every field is a value type, so a clone
/// shares no mutable memory with its source.
#[derive(Debug, Clone)]
pub struct Params {
    /// Explicitly requested device serial
    pub req_serial: Option<String>,
    /// Select the single USB-attached device
    pub select_usb: bool,
    /// Select the single network-attached device
    pub select_tcpip: bool,

    /// Migrate the selected device to network transport first
    pub tcpip: bool,
    /// Connect directly to this network address (implies `tcpip`)
    pub tcpip_dst: Option<String>,

    /// Random 31-bit session identifier, generated once
    pub scid: u32,
    /// Agent log verbosity
    pub log_level: LogLevel,

    pub video: bool,
    pub audio: bool,
    pub control: bool,

    pub video_codec: Codec,
    pub audio_codec: Codec,
    pub video_source: VideoSource,
    pub audio_source: AudioSource,

    /// Video bit rate in bits per second (0 = agent default)
    pub video_bit_rate: u32,
    /// Audio bit rate in bits per second (0 = agent default)
    pub audio_bit_rate: u32,
    /// Longest-side cap in pixels (0 = unlimited)
    pub max_size: u16,
    /// Frame rate cap (0 = unlimited)
    pub max_fps: u16,
    /// Locked orientation in quarter turns (`None` = unlocked)
    pub lock_video_orientation: Option<u8>,
    /// Crop rectangle, `width:height:x:y`
    pub crop: Option<String>,

    /// Display to capture (display source only, 0 = default display)
    pub display_id: u32,
    /// Camera to capture (camera source only)
    pub camera_id: Option<String>,
    /// Camera facing constraint (camera source only)
    pub camera_position: CameraPosition,

    pub video_encoder: Option<String>,
    pub audio_encoder: Option<String>,
    pub video_codec_options: Option<String>,
    pub audio_codec_options: Option<String>,

    pub show_touches: bool,
    pub stay_awake: bool,
    pub power_off_on_close: bool,
    pub clipboard_autosync: bool,
    pub downsize_on_error: bool,
    pub cleanup: bool,
    pub power_on: bool,

    pub list_encoders: bool,
    pub list_displays: bool,
    pub list_cameras: bool,

    pub port_range: PortRange,
    /// Never attempt a reverse tunnel
    pub force_tunnel_forward: bool,
    /// Kill the bridge daemon when the session ends
    pub kill_bridge_on_close: bool,
}

impl Params {
    /// Generate a fresh 31-bit session identifier
    pub fn generate_scid() -> u32 {
        rand::thread_rng().gen_range(0..0x8000_0000)
    }

    /// Whether any list-only query flag is set
    pub fn is_list_query(&self) -> bool {
        self.list_encoders || self.list_displays || self.list_cameras
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            req_serial: None,
            select_usb: false,
            select_tcpip: false,
            tcpip: false,
            tcpip_dst: None,
            scid: Self::generate_scid(),
            log_level: LogLevel::Info,
            video: true,
            audio: true,
            control: true,
            video_codec: Codec::H264,
            audio_codec: Codec::Opus,
            video_source: VideoSource::Display,
            audio_source: AudioSource::Output,
            video_bit_rate: 0,
            audio_bit_rate: 0,
            max_size: 0,
            max_fps: 0,
            lock_video_orientation: None,
            crop: None,
            display_id: 0,
            camera_id: None,
            camera_position: CameraPosition::All,
            video_encoder: None,
            audio_encoder: None,
            video_codec_options: None,
            audio_codec_options: None,
            show_touches: false,
            stay_awake: false,
            power_off_on_close: false,
            clipboard_autosync: true,
            downsize_on_error: true,
            cleanup: true,
            power_on: true,
            list_encoders: false,
            list_displays: false,
            list_cameras: false,
            port_range: PortRange::default(),
            force_tunnel_forward: false,
            kill_bridge_on_close: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scid_fits_in_31_bits() {
        for _ in 0..1000 {
            assert_eq!(Params::generate_scid() & 0x8000_0000, 0);
        }
    }

    #[test]
    fn clone_is_independent_of_source() {
        let mut source = Params {
            req_serial: Some("emulator-5554".to_string()),
            crop: Some("1920:1080:0:0".to_string()),
            video_encoder: Some("OMX.qcom.video.encoder.avc".to_string()),
            ..Params::default()
        };
        let copy = source.clone();

        // Mutating the source must never affect the copy
        source.req_serial = Some("other".to_string());
        source.crop = None;
        source.video_encoder.as_mut().unwrap().clear();

        assert_eq!(copy.req_serial.as_deref(), Some("emulator-5554"));
        assert_eq!(copy.crop.as_deref(), Some("1920:1080:0:0"));
        assert_eq!(
            copy.video_encoder.as_deref(),
            Some("OMX.qcom.video.encoder.avc")
        );
    }

    #[test]
    fn port_range_iterates_inclusively() {
        let range = PortRange::new(27183, 27185);
        let ports: Vec<u16> = range.iter().collect();
        assert_eq!(ports, vec![27183, 27184, 27185]);
    }
}
