//! Device records and selection
//!
//! Parses the bridge's `devices -l` listing and resolves a selection
//! request to exactly one usable device.

use crate::error::AdbError;

/// Connection state of a listed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Ready to accept commands
    Device,
    /// Listed but not reachable
    Offline,
    /// Attached but the host is not authorized yet
    Unauthorized,
    /// Any other state reported by the bridge
    Other(String),
}

impl DeviceState {
    fn parse(s: &str) -> Self {
        match s {
            "device" => Self::Device,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One entry from the device listing
#[derive(Debug, Clone)]
pub struct AdbDevice {
    /// Serial used to address the device in every bridge command
    pub serial: String,
    /// Connection state
    pub state: DeviceState,
    /// Model name, when the listing provides one
    pub model: Option<String>,
}

impl AdbDevice {
    /// Whether the serial denotes a network-transport device
    pub fn is_tcpip(&self) -> bool {
        serial_is_tcpip(&self.serial)
    }

    /// Whether the device can be selected for a session
    pub fn is_selectable(&self) -> bool {
        self.state == DeviceState::Device
    }
}

/// Whether a serial denotes a network-transport device (`ip:port` form)
pub fn serial_is_tcpip(serial: &str) -> bool {
    serial.contains(':')
}

/// How to resolve a logical device request to one concrete device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Exact serial match
    Serial(String),
    /// The single USB-attached device
    Usb,
    /// The single network-attached device
    Tcpip,
    /// Any device, as long as exactly one is attached
    Any,
}

impl DeviceSelector {
    fn matches(&self, device: &AdbDevice) -> bool {
        match self {
            Self::Serial(serial) => device.serial == *serial,
            Self::Usb => !device.is_tcpip(),
            Self::Tcpip => device.is_tcpip(),
            Self::Any => true,
        }
    }
}

/// Parse the output of `adb devices -l`.
///
/// Lines before the "List of devices attached" header are daemon chatter
/// and are skipped; every following non-empty line is one device.
pub fn parse_device_list(output: &str) -> Vec<AdbDevice> {
    let mut devices = Vec::new();
    let mut in_list = false;
    for line in output.lines() {
        if !in_list {
            in_list = line.starts_with("List of devices attached");
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(serial), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let model = fields
            .find_map(|f| f.strip_prefix("model:"))
            .map(str::to_string);
        devices.push(AdbDevice {
            serial: serial.to_string(),
            state: DeviceState::parse(state),
            model,
        });
    }
    devices
}

/// Resolve a selector against a device listing.
///
/// Unusable matches (offline, unauthorized) are reported but never
/// selected. Zero usable matches is `NoDeviceFound`; more than one is
/// `AmbiguousSelection` carrying every candidate serial.
pub fn select_device(
    selector: &DeviceSelector,
    devices: Vec<AdbDevice>,
) -> Result<AdbDevice, AdbError> {
    let (usable, unusable): (Vec<_>, Vec<_>) = devices
        .into_iter()
        .filter(|d| selector.matches(d))
        .partition(AdbDevice::is_selectable);

    for device in &unusable {
        tracing::warn!(
            serial = %device.serial,
            state = ?device.state,
            "Skipping device in unusable state"
        );
    }

    match usable.len() {
        0 => Err(AdbError::NoDeviceFound),
        1 => {
            let device = usable.into_iter().next().unwrap();
            tracing::debug!(serial = %device.serial, model = ?device.model, "Device selected");
            Ok(device)
        }
        _ => Err(AdbError::AmbiguousSelection(
            usable.into_iter().map(|d| d.serial).collect(),
        )),
    }
}
