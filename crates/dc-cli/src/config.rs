//! Configuration file support
//!
//! Persistent defaults for options that rarely change between runs.
//! Command-line arguments always win over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devcast")
        .join("config.toml")
}

/// Local port range for forward-tunnel binding
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRangeConfig {
    pub first: u16,
    pub last: u16,
}

/// Persistent defaults loaded from `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Path to the adb executable (overrides `$ADB` and `PATH` lookup)
    pub adb_path: Option<String>,

    /// Agent log verbosity (error, warn, info, debug, verbose)
    pub log_level: Option<String>,

    /// Video bit rate in bits per second
    pub video_bit_rate: Option<u32>,
    /// Audio bit rate in bits per second
    pub audio_bit_rate: Option<u32>,
    /// Longest-side cap in pixels
    pub max_size: Option<u16>,
    /// Frame rate cap
    pub max_fps: Option<u16>,

    /// Local ports to try for forward tunnels
    pub port_range: Option<PortRangeConfig>,

    /// Never attempt a reverse tunnel
    pub force_adb_forward: bool,
    /// Kill the adb daemon when the session ends
    pub kill_adb_on_close: bool,
}

/// Load the configuration file, treating a missing file as defaults
pub fn load_config(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/devcast/config.toml")).unwrap();
        assert!(config.adb_path.is_none());
        assert!(!config.force_adb_forward);
    }

    #[test]
    fn partial_file_fills_the_rest_with_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
            video_bit_rate = 8000000
            force_adb_forward = true

            [port_range]
            first = 30000
            last = 30010
            "#,
        )
        .unwrap();
        assert_eq!(config.video_bit_rate, Some(8_000_000));
        assert!(config.force_adb_forward);
        assert!(!config.kill_adb_on_close);
        let range = config.port_range.unwrap();
        assert_eq!((range.first, range.last), (30000, 30010));
    }
}
