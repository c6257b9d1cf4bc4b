//! Command-line argument definitions
//!
//! Flags map onto the session launch parameters; options left unset fall
//! back to the configuration file, then to the built-in defaults.

use anyhow::{bail, Result};
use clap::Parser;
use dc_session::{
    AudioSource, CameraPosition, Codec, LogLevel, Params, PortRange, VideoSource,
};

use crate::config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "devcast")]
#[command(about = "Launch and supervise the devcast agent on an Android device")]
#[command(version)]
pub struct Cli {
    /// Device serial (overrides ANDROID_SERIAL)
    #[arg(short = 's', long, value_name = "SERIAL")]
    pub serial: Option<String>,

    /// Use the (only) device connected over USB
    #[arg(short = 'd', long, conflicts_with = "serial")]
    pub select_usb: bool,

    /// Use the (only) device connected over TCP/IP
    #[arg(short = 'e', long, conflicts_with_all = ["serial", "select_usb"])]
    pub select_tcpip: bool,

    /// Switch the device to TCP/IP mode, or connect to the given
    /// ip[:port] directly
    #[arg(long, value_name = "ADDR", num_args = 0..=1, require_equals = true)]
    pub tcpip: Option<Option<String>>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// Log level (error, warn, info, debug, verbose)
    #[arg(long, value_name = "LEVEL", value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Disable video capture
    #[arg(long)]
    pub no_video: bool,

    /// Disable audio capture
    #[arg(long)]
    pub no_audio: bool,

    /// Disable device control
    #[arg(long)]
    pub no_control: bool,

    /// Video codec (h264, h265, av1)
    #[arg(long, value_name = "CODEC", value_parser = parse_video_codec)]
    pub video_codec: Option<Codec>,

    /// Audio codec (opus, aac, raw)
    #[arg(long, value_name = "CODEC", value_parser = parse_audio_codec)]
    pub audio_codec: Option<Codec>,

    /// Capture the camera instead of the display
    #[arg(long)]
    pub camera: bool,

    /// Capture the microphone instead of the device audio output
    #[arg(long)]
    pub mic: bool,

    /// Video bit rate in bits per second
    #[arg(short = 'b', long, value_name = "RATE")]
    pub video_bit_rate: Option<u32>,

    /// Audio bit rate in bits per second
    #[arg(long, value_name = "RATE")]
    pub audio_bit_rate: Option<u32>,

    /// Cap the longest video dimension in pixels
    #[arg(short = 'm', long, value_name = "PIXELS")]
    pub max_size: Option<u16>,

    /// Cap the capture frame rate
    #[arg(long, value_name = "FPS")]
    pub max_fps: Option<u16>,

    /// Lock the video orientation (0, 1, 2 or 3 quarter turns)
    #[arg(long, value_name = "TURNS")]
    pub lock_video_orientation: Option<u8>,

    /// Crop the device screen, width:height:x:y
    #[arg(long, value_name = "RECT")]
    pub crop: Option<String>,

    /// Capture the given display id
    #[arg(long, value_name = "ID", default_value_t = 0)]
    pub display_id: u32,

    /// Capture the given camera id
    #[arg(long, value_name = "ID")]
    pub camera_id: Option<String>,

    /// Camera facing (front, back, external)
    #[arg(long, value_name = "FACING", value_parser = parse_camera_position)]
    pub camera_position: Option<CameraPosition>,

    /// Use a specific video encoder
    #[arg(long, value_name = "NAME")]
    pub video_encoder: Option<String>,

    /// Use a specific audio encoder
    #[arg(long, value_name = "NAME")]
    pub audio_encoder: Option<String>,

    /// Codec options for the video encoder, key[:type]=value[,...]
    #[arg(long, value_name = "OPTS")]
    pub video_codec_options: Option<String>,

    /// Codec options for the audio encoder, key[:type]=value[,...]
    #[arg(long, value_name = "OPTS")]
    pub audio_codec_options: Option<String>,

    /// Show touches on the device screen
    #[arg(short = 't', long)]
    pub show_touches: bool,

    /// Keep the device awake while connected
    #[arg(short = 'w', long)]
    pub stay_awake: bool,

    /// Turn the device screen off on close
    #[arg(long)]
    pub power_off_on_close: bool,

    /// Disable clipboard synchronization
    #[arg(long)]
    pub no_clipboard_autosync: bool,

    /// Disable automatic downsizing on encoder error
    #[arg(long)]
    pub no_downsize_on_error: bool,

    /// Leave device-side state behind on close
    #[arg(long)]
    pub no_cleanup: bool,

    /// Do not power the device on before capturing
    #[arg(long)]
    pub no_power_on: bool,

    /// List the device encoders and exit
    #[arg(long)]
    pub list_encoders: bool,

    /// List the device displays and exit
    #[arg(long)]
    pub list_displays: bool,

    /// List the device cameras and exit
    #[arg(long)]
    pub list_cameras: bool,

    /// Local ports to try for forward tunnels, first[:last]
    #[arg(short = 'p', long, value_name = "RANGE", value_parser = parse_port_range)]
    pub port: Option<PortRange>,

    /// Never attempt a reverse tunnel
    #[arg(long)]
    pub force_adb_forward: bool,

    /// Kill the adb daemon when the session ends
    #[arg(long)]
    pub kill_adb_on_close: bool,
}

pub(crate) fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s {
        "verbose" => Ok(LogLevel::Verbose),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown log level: {other}")),
    }
}

fn parse_video_codec(s: &str) -> Result<Codec, String> {
    match s {
        "h264" => Ok(Codec::H264),
        "h265" => Ok(Codec::H265),
        "av1" => Ok(Codec::Av1),
        other => Err(format!("unknown video codec: {other}")),
    }
}

fn parse_audio_codec(s: &str) -> Result<Codec, String> {
    match s {
        "opus" => Ok(Codec::Opus),
        "aac" => Ok(Codec::Aac),
        "raw" => Ok(Codec::Raw),
        other => Err(format!("unknown audio codec: {other}")),
    }
}

fn parse_camera_position(s: &str) -> Result<CameraPosition, String> {
    match s {
        "front" => Ok(CameraPosition::Front),
        "back" => Ok(CameraPosition::Back),
        "external" => Ok(CameraPosition::External),
        other => Err(format!("unknown camera facing: {other}")),
    }
}

fn parse_port_range(s: &str) -> Result<PortRange, String> {
    let (first, last) = match s.split_once(':') {
        Some((first, last)) => (first, last),
        None => (s, s),
    };
    let first: u16 = first.parse().map_err(|_| format!("invalid port: {first}"))?;
    let last: u16 = last.parse().map_err(|_| format!("invalid port: {last}"))?;
    if last < first {
        return Err(format!("invalid port range: {s}"));
    }
    Ok(PortRange::new(first, last))
}

impl Cli {
    /// Merge the arguments with the configuration file into the session
    /// launch parameters
    pub fn into_params(self, config: &CliConfig) -> Result<Params> {
        if self.camera_id.is_some() && !self.camera {
            bail!("--camera-id requires --camera");
        }
        if self.camera_position.is_some() && !self.camera {
            bail!("--camera-position requires --camera");
        }
        if self.camera && self.display_id != 0 {
            bail!("--display-id conflicts with --camera");
        }

        let (tcpip, tcpip_dst) = match self.tcpip {
            None => (false, None),
            Some(None) => (true, None),
            Some(Some(addr)) => (true, Some(addr)),
        };

        let config_log_level = config
            .log_level
            .as_deref()
            .map(|s| parse_log_level(s).map_err(anyhow::Error::msg))
            .transpose()?;

        let defaults = Params::default();
        Ok(Params {
            req_serial: self.serial,
            select_usb: self.select_usb,
            select_tcpip: self.select_tcpip,
            tcpip,
            tcpip_dst,
            log_level: self
                .log_level
                .or(config_log_level)
                .unwrap_or(defaults.log_level),
            video: !self.no_video,
            audio: !self.no_audio,
            control: !self.no_control,
            video_codec: self.video_codec.unwrap_or(defaults.video_codec),
            audio_codec: self.audio_codec.unwrap_or(defaults.audio_codec),
            video_source: if self.camera {
                VideoSource::Camera
            } else {
                VideoSource::Display
            },
            audio_source: if self.mic {
                AudioSource::Mic
            } else {
                AudioSource::Output
            },
            video_bit_rate: self
                .video_bit_rate
                .or(config.video_bit_rate)
                .unwrap_or(defaults.video_bit_rate),
            audio_bit_rate: self
                .audio_bit_rate
                .or(config.audio_bit_rate)
                .unwrap_or(defaults.audio_bit_rate),
            max_size: self.max_size.or(config.max_size).unwrap_or(defaults.max_size),
            max_fps: self.max_fps.or(config.max_fps).unwrap_or(defaults.max_fps),
            lock_video_orientation: self.lock_video_orientation,
            crop: self.crop,
            display_id: self.display_id,
            camera_id: self.camera_id,
            camera_position: self.camera_position.unwrap_or(CameraPosition::All),
            video_encoder: self.video_encoder,
            audio_encoder: self.audio_encoder,
            video_codec_options: self.video_codec_options,
            audio_codec_options: self.audio_codec_options,
            show_touches: self.show_touches,
            stay_awake: self.stay_awake,
            power_off_on_close: self.power_off_on_close,
            clipboard_autosync: !self.no_clipboard_autosync,
            downsize_on_error: !self.no_downsize_on_error,
            cleanup: !self.no_cleanup,
            power_on: !self.no_power_on,
            list_encoders: self.list_encoders,
            list_displays: self.list_displays,
            list_cameras: self.list_cameras,
            port_range: self
                .port
                .or_else(|| {
                    config
                        .port_range
                        .map(|r| PortRange::new(r.first, r.last))
                })
                .unwrap_or(defaults.port_range),
            force_tunnel_forward: self.force_adb_forward || config.force_adb_forward,
            kill_bridge_on_close: self.kill_adb_on_close || config.kill_adb_on_close,
            ..defaults
        })
    }
}
