// SPDX-License-Identifier: MPL-2.0

//! Error types for the scanner
//!
//! [`ScanError`] is the taxonomy reported through a session's error channel.
//! Capability implementations report [`BackendError`](crate::backends::camera::BackendError),
//! which the session folds into a `ScanError` before surfacing it.

use crate::backends::camera::BackendError;
use crate::session::SessionStatus;
use std::fmt;

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors surfaced by a scan session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The user (or platform policy) declined camera access
    PermissionDenied(String),
    /// The platform could not list capture devices
    DeviceEnumeration(String),
    /// The selected device is not (or no longer) present
    DeviceNotFound(String),
    /// The decoder failed with something other than "no symbol found"
    DecoderFatal(String),
    /// The device exists but could not be opened (busy, hardware fault, unsupported format)
    DeviceUnavailable(String),
    /// Operation invoked in a state that does not allow it
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
}

impl ScanError {
    /// Wrap any backend failure that happened while listing devices
    pub fn enumeration(err: BackendError) -> Self {
        ScanError::DeviceEnumeration(err.to_string())
    }

    /// Whether the session can be restarted after this error
    ///
    /// Only `InvalidState` is a programming error; everything else is
    /// cleared by calling `start` again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScanError::InvalidState { .. })
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::PermissionDenied(_) => "permission-denied",
            ScanError::DeviceEnumeration(_) => "device-enumeration",
            ScanError::DeviceNotFound(_) => "device-not-found",
            ScanError::DecoderFatal(_) => "decoder-fatal",
            ScanError::DeviceUnavailable(_) => "device-unavailable",
            ScanError::InvalidState { .. } => "invalid-state",
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied(msg) => write!(f, "Camera permission denied: {}", msg),
            ScanError::DeviceEnumeration(msg) => write!(f, "Cannot list cameras: {}", msg),
            ScanError::DeviceNotFound(msg) => write!(f, "Camera not found: {}", msg),
            ScanError::DecoderFatal(msg) => write!(f, "Decoder failed: {}", msg),
            ScanError::DeviceUnavailable(msg) => write!(f, "Camera unavailable: {}", msg),
            ScanError::InvalidState { operation, status } => {
                write!(f, "Cannot {} while session is {}", operation, status)
            }
        }
    }
}

impl std::error::Error for ScanError {}

impl From<BackendError> for ScanError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied(msg) => ScanError::PermissionDenied(msg),
            BackendError::DeviceNotFound(msg) => ScanError::DeviceNotFound(msg),
            BackendError::EnumerationFailed(msg) => ScanError::DeviceEnumeration(msg),
            other => ScanError::DeviceUnavailable(other.to_string()),
        }
    }
}

/// Configuration load/save errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// No per-user config directory on this platform
    NoConfigDir,
    /// Reading or writing the file failed
    Io(String),
    /// The file is not valid JSON for [`Config`](crate::config::Config)
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
            ConfigError::Io(msg) => write!(f, "Configuration I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
