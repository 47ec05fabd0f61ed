//! Port-specific error types.
//!
//! Every failure the port layer can report is one of these variants. None of
//! them is fatal to the process: the caller closes the connection (if any) and
//! retries with a fresh connect.

use std::io;
use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The configuration was rejected before any device interaction.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The device node could not be opened (missing, permission denied, busy).
    #[error("Unable to open {path}: {source}")]
    DeviceOpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The OS rejected the requested line-discipline settings.
    #[error("Unable to apply line settings to {path}: {source}")]
    AttributeApplyFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A read or write syscall failed (distinct from "no data available").
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The modem status query failed, usually because the device went away.
    #[error("Control line query failed: {0}")]
    ControlLineQueryFailed(#[source] io::Error),

    /// The device has no modem status lines to query (pseudo-terminals,
    /// some USB bridges). The connection itself is still usable.
    #[error("Control lines unavailable: {0}")]
    ControlLinesUnavailable(#[source] io::Error),

    /// The event host refused to register a readiness watch or timer.
    #[error("Event source registration failed: {0}")]
    EventSource(String),

    /// Attempted to open while a connection is already live.
    #[error("Port is already open")]
    AlreadyOpen,

    /// Attempted to use a connection that is closed.
    #[error("Port is not open")]
    NotOpen,
}

impl PortError {
    /// Create an InvalidConfiguration error from a message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a DeviceOpenFailed error for `path`.
    pub fn open_failed(path: impl Into<String>, source: io::Error) -> Self {
        Self::DeviceOpenFailed {
            path: path.into(),
            source,
        }
    }

    /// Create an AttributeApplyFailed error for `path`.
    pub fn attributes(path: impl Into<String>, source: io::Error) -> Self {
        Self::AttributeApplyFailed {
            path: path.into(),
            source,
        }
    }

    /// Classify a failed modem status request.
    ///
    /// `ENOTTY` and `EINVAL` mean the driver has no such lines; anything else
    /// is treated as the device failing.
    pub fn control_query(source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(code) if code == ENOTTY || code == EINVAL => Self::ControlLinesUnavailable(source),
            _ => Self::ControlLineQueryFailed(source),
        }
    }

    /// Whether this error means the device itself is gone or unusable.
    ///
    /// A zero-byte read on a non-empty buffer is reported as `UnexpectedEof`
    /// and counts as a hangup.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::ControlLineQueryFailed(_) | Self::NotOpen => true,
            Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => true,
            Self::Io(e) => matches!(
                e.raw_os_error(),
                Some(code) if code == EIO || code == ENXIO || code == ENODEV || code == EBADF
            ),
            _ => false,
        }
    }
}

#[cfg(unix)]
use libc::{EBADF, EINVAL, EIO, ENODEV, ENOTTY, ENXIO};

#[cfg(not(unix))]
const EIO: i32 = 5;
#[cfg(not(unix))]
const ENXIO: i32 = 6;
#[cfg(not(unix))]
const EBADF: i32 = 9;
#[cfg(not(unix))]
const ENODEV: i32 = 19;
#[cfg(not(unix))]
const EINVAL: i32 = 22;
#[cfg(not(unix))]
const ENOTTY: i32 = 25;
