// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera capabilities

//! Shared types for camera backends

use crate::constants::UNLABELED_DEVICE_PREFIX;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A video capture device as reported by the platform
///
/// The id is opaque to everything except the backend that produced it
/// (for V4L2 it is the device node path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoDevice {
    pub id: String,
    /// Human-readable name; may be empty when the platform withholds labels
    pub label: String,
}

impl VideoDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Label for display, falling back to `Camera <id>` for unlabeled devices
    pub fn display_name(&self) -> String {
        if self.label.trim().is_empty() {
            format!("{} {}", UNLABELED_DEVICE_PREFIX, self.id)
        } else {
            self.label.clone()
        }
    }
}

impl std::fmt::Display for VideoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera (towards the user)
    User,
    /// Back camera (away from the user), preferred for scanning
    #[default]
    Environment,
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// Constraints passed to [`MediaCapture::open`](super::MediaCapture::open)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Exact device to open; `None` lets the backend pick
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
}

impl std::fmt::Display for MediaConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} facing {} on {}",
            self.width,
            self.height,
            self.facing,
            self.device_id.as_deref().unwrap_or("any device")
        )
    }
}

/// Lifecycle state of a single track inside a media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// Description of one track of an open stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub label: String,
    pub state: TrackState,
}

/// Pixel format for camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Gray8 - 8-bit luma, what the capture threads hand to the decoder
    Gray8,
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
}

impl PixelFormat {
    /// Bytes per pixel in the packed row
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::YUYV => 2,
            PixelFormat::RGBA => 4,
        }
    }
}

/// A single frame from the camera
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Pixel data, `stride * height` bytes
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// When the capture thread dequeued the frame
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed grayscale frame
    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            format: PixelFormat::Gray8,
            stride: width,
            captured_at: Instant::now(),
        }
    }

    /// Whether the buffer is large enough for the declared geometry
    pub fn is_complete(&self) -> bool {
        let row = self.width as usize * self.format.bytes_per_pixel() as usize;
        if self.width == 0 || self.height == 0 || (self.stride as usize) < row {
            return false;
        }
        let needed = self.stride as usize * (self.height as usize - 1) + row;
        self.data.len() >= needed
    }
}

/// Receiving side of a stream's frame channel
pub type FrameReceiver = tokio::sync::mpsc::Receiver<CameraFrame>;

/// Sending side of a stream's frame channel
pub type FrameSender = tokio::sync::mpsc::Sender<CameraFrame>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Device listing failed
    EnumerationFailed(String),
    /// Access to the device was refused
    PermissionDenied(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Device is held by another process
    Busy(String),
    /// Format not supported
    FormatNotSupported(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::EnumerationFailed(msg) => write!(f, "Enumeration failed: {}", msg),
            BackendError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::Busy(msg) => write!(f, "Device busy: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let msg = err.to_string();
        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => return BackendError::PermissionDenied(msg),
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                return BackendError::DeviceNotFound(msg);
            }
            Some(libc::EBUSY) => return BackendError::Busy(msg),
            _ => {}
        }
        match err.kind() {
            ErrorKind::PermissionDenied => BackendError::PermissionDenied(msg),
            ErrorKind::NotFound => BackendError::DeviceNotFound(msg),
            _ => BackendError::IoError(msg),
        }
    }
}
