//! Bridge error types

use thiserror::Error;

/// Errors that can occur when talking to the device bridge
#[derive(Error, Debug)]
pub enum AdbError {
    /// The bridge executable could not be spawned
    #[error("Could not execute \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The bridge command ran but reported failure
    #[error("Command \"{command}\" failed: {message}")]
    CommandFailed { command: String, message: String },

    /// No device matched the selection request
    #[error("No matching device found")]
    NoDeviceFound,

    /// More than one device matched an "any" selection request
    #[error("Multiple devices match ({0:?}), select one explicitly")]
    AmbiguousSelection(Vec<String>),

    /// The operation was interrupted by a stop request
    #[error("Bridge operation interrupted")]
    Interrupted,

    /// I/O error on the bridge process streams
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
