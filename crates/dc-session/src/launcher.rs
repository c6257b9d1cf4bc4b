//! Agent launcher
//!
//! Serializes the launch parameters into the agent's `key=value`
//! argument protocol and spawns the device-side process. Keys whose
//! value equals the agent's documented default are omitted to keep the
//! invocation minimal and diagnosable.

use dc_bridge::{AdbError, AgentProcess, DeviceBridge};

use crate::deploy::DEVICE_AGENT_PATH;
use crate::error::SessionError;
use crate::params::{AudioSource, CameraPosition, Codec, Params, VideoSource};

/// Device-side entry point class
const AGENT_MAIN_CLASS: &str = "com.devcast.Agent";

/// Agent version, must match the pushed artifact
const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the `key=value` argument list.
///
/// `scid` and `log_level` always come first, in that order; every other
/// key appears only when its value differs from the agent default.
pub fn build_agent_args(params: &Params, tunnel_forward: bool) -> Vec<String> {
    let mut args = Vec::new();

    args.push(format!("scid={:08x}", params.scid));
    args.push(format!("log_level={}", params.log_level.as_str()));

    if !params.video {
        args.push("video=false".to_string());
    }
    if params.video_bit_rate != 0 {
        args.push(format!("video_bit_rate={}", params.video_bit_rate));
    }
    if !params.audio {
        args.push("audio=false".to_string());
    }
    if params.audio_bit_rate != 0 {
        args.push(format!("audio_bit_rate={}", params.audio_bit_rate));
    }
    if params.video_codec != Codec::H264 {
        args.push(format!("video_codec={}", params.video_codec.as_str()));
    }
    if params.audio_codec != Codec::Opus {
        args.push(format!("audio_codec={}", params.audio_codec.as_str()));
    }
    if params.video_source != VideoSource::Display {
        args.push("video_source=camera".to_string());
    }
    if params.audio_source != AudioSource::Output {
        args.push("audio_source=mic".to_string());
    }
    if params.max_size != 0 {
        args.push(format!("max_size={}", params.max_size));
    }
    if params.max_fps != 0 {
        args.push(format!("max_fps={}", params.max_fps));
    }
    if let Some(rotation) = params.lock_video_orientation {
        args.push(format!("lock_video_orientation={rotation}"));
    }
    if tunnel_forward {
        args.push("tunnel_forward=true".to_string());
    }
    if let Some(crop) = &params.crop {
        args.push(format!("crop={crop}"));
    }
    if !params.control {
        // By default, control is enabled
        args.push("control=false".to_string());
    }
    if params.video_source == VideoSource::Display && params.display_id != 0 {
        args.push(format!("display_id={}", params.display_id));
    }
    if params.video_source == VideoSource::Camera {
        if let Some(camera_id) = &params.camera_id {
            args.push(format!("camera_id={camera_id}"));
        }
        if let Some(position) = params.camera_position.as_str() {
            args.push(format!("camera_position={position}"));
        }
    }
    if params.show_touches {
        args.push("show_touches=true".to_string());
    }
    if params.stay_awake {
        args.push("stay_awake=true".to_string());
    }
    if let Some(options) = &params.video_codec_options {
        args.push(format!("video_codec_options={options}"));
    }
    if let Some(options) = &params.audio_codec_options {
        args.push(format!("audio_codec_options={options}"));
    }
    if let Some(encoder) = &params.video_encoder {
        args.push(format!("video_encoder={encoder}"));
    }
    if let Some(encoder) = &params.audio_encoder {
        args.push(format!("audio_encoder={encoder}"));
    }
    if params.power_off_on_close {
        args.push("power_off_on_close=true".to_string());
    }
    if !params.clipboard_autosync {
        // By default, clipboard_autosync is enabled
        args.push("clipboard_autosync=false".to_string());
    }
    if !params.downsize_on_error {
        // By default, downsize_on_error is enabled
        args.push("downsize_on_error=false".to_string());
    }
    if !params.cleanup {
        // By default, cleanup is enabled
        args.push("cleanup=false".to_string());
    }
    if !params.power_on {
        // By default, power_on is enabled
        args.push("power_on=false".to_string());
    }
    if params.list_encoders {
        args.push("list_encoders=true".to_string());
    }
    if params.list_displays {
        args.push("list_displays=true".to_string());
    }
    if params.list_cameras {
        args.push("list_cameras=true".to_string());
    }

    args
}

/// Full device shell argument vector for the agent invocation
pub fn build_shell_args(params: &Params, tunnel_forward: bool) -> Vec<String> {
    let mut shell_args = vec![
        format!("CLASSPATH={DEVICE_AGENT_PATH}"),
        "app_process".to_string(),
        // unused working directory argument
        "/".to_string(),
        AGENT_MAIN_CLASS.to_string(),
        AGENT_VERSION.to_string(),
    ];
    shell_args.extend(build_agent_args(params, tunnel_forward));
    shell_args
}

/// Spawn the agent on the device with inherited stdout/stderr
pub fn launch_agent(
    bridge: &dyn DeviceBridge,
    serial: &str,
    params: &Params,
    tunnel_forward: bool,
) -> Result<AgentProcess, SessionError> {
    let shell_args = build_shell_args(params, tunnel_forward);
    bridge
        .spawn_agent(serial, shell_args)
        .map_err(|err| match err {
            AdbError::Interrupted => SessionError::Interrupted,
            other => SessionError::Launch(other),
        })
}
