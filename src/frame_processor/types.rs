// SPDX-License-Identifier: MPL-2.0

//! Core types for frame processing results

use crate::backends::camera::CameraFrame;
use std::fmt;

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
/// This allows easy transformation to screen coordinates regardless of
/// the actual frame size or display scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Bounding box of a set of pixel-space corner points, clamped to the frame
    pub fn bounding(points: &[(f32, f32)], frame_width: u32, frame_height: u32) -> Option<Self> {
        if points.is_empty() || frame_width == 0 || frame_height == 0 {
            return None;
        }
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let min_x = min_x.clamp(0.0, fw);
        let min_y = min_y.clamp(0.0, fh);
        let max_x = max_x.clamp(0.0, fw);
        let max_y = max_y.clamp(0.0, fh);

        Some(Self {
            x: min_x / fw,
            y: min_y / fh,
            width: (max_x - min_x) / fw,
            height: (max_y - min_y) / fh,
        })
    }

    /// Whether a normalized point falls inside the region
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// One recognized symbol
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSymbol {
    /// Decoded text
    pub payload: String,
    /// Where the symbol sits in the frame, when the decoder knows
    pub region: Option<FrameRegion>,
}

impl DecodedSymbol {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            region: None,
        }
    }
}

/// Why a frame produced no symbols
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No symbol in view; expected on most frames and never surfaced
    NotFound,
    /// Anything else; surfaced to the session as a decoder failure
    Fatal(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotFound => write!(f, "No symbol found"),
            DecodeError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A barcode decoder
///
/// `decode` is CPU-bound and is called from a blocking task, never on the
/// async runtime directly.
pub trait BarcodeDecoder: Send + Sync {
    /// Decode every symbol visible in `frame`
    ///
    /// Returns `Err(DecodeError::NotFound)` rather than an empty vector when
    /// nothing is recognized.
    fn decode(&self, frame: &CameraFrame) -> Result<Vec<DecodedSymbol>, DecodeError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}
