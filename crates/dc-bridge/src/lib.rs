//! dc-bridge: device bridge integration for devcast
//!
//! Wraps the `adb` command-line tool behind the [`DeviceBridge`] trait:
//! device listing and selection, file push, port tunnels, network
//! transport attach/detach, and agent process launch. All operations are
//! interruptible through a `CancellationToken`.

pub mod adb;
pub mod bridge;
pub mod device;
pub mod error;
pub mod process;

pub use adb::Adb;
pub use bridge::DeviceBridge;
pub use device::{AdbDevice, DeviceSelector, DeviceState};
pub use error::AdbError;
pub use process::AgentProcess;
