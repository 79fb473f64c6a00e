// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! This module implements QR code detection using the rqrr crate.
//! It reduces camera frames to a luma plane, downscales large frames and
//! searches for QR grids, returning their positions and decoded content.

use super::luma::prepare;
use crate::backends::camera::CameraFrame;
use crate::constants::DEFAULT_DECODER_MAX_DIMENSION;
use crate::frame_processor::types::{BarcodeDecoder, DecodeError, DecodedSymbol, FrameRegion};
use tracing::{debug, trace};

/// QR code detector
///
/// Analyzes camera frames to detect and decode QR codes.
/// Optimized for real-time processing with frame downscaling.
pub struct QrDetector {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    /// Create a new QR detector with default settings
    pub fn new() -> Self {
        Self {
            max_dimension: DEFAULT_DECODER_MAX_DIMENSION,
        }
    }

    /// Create a QR detector with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }
}

impl BarcodeDecoder for QrDetector {
    fn decode(&self, frame: &CameraFrame) -> Result<Vec<DecodedSymbol>, DecodeError> {
        detect_sync(frame, self.max_dimension)
    }

    fn name(&self) -> &'static str {
        "qr"
    }
}

/// Synchronous QR detection (runs in blocking task)
fn detect_sync(frame: &CameraFrame, max_dimension: u32) -> Result<Vec<DecodedSymbol>, DecodeError> {
    let start = std::time::Instant::now();
    let luma = prepare(frame, max_dimension)?;

    let conversion_time = start.elapsed();
    trace!(
        proc_width = luma.width,
        proc_height = luma.height,
        scale = luma.scale,
        conversion_ms = conversion_time.as_millis(),
        "Prepared luma plane for processing"
    );

    let row = luma.width as usize;
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        luma.width as usize,
        luma.height as usize,
        |x, y| luma.plane[y * row + x],
    );
    let grids = prepared.detect_grids();

    trace!(
        count = grids.len(),
        detection_ms = (start.elapsed() - conversion_time).as_millis(),
        "QR grid detection complete"
    );

    let mut symbols = Vec::with_capacity(grids.len());
    for grid in grids {
        let content = match grid.decode() {
            Ok((_meta, content)) => content,
            Err(e) => {
                debug!(error = %e, "Failed to decode QR grid");
                continue;
            }
        };

        // Corners come back in processing space; scale to source pixels
        let corners: Vec<(f32, f32)> = grid
            .bounds
            .iter()
            .map(|p| luma.to_source(p.x as f32, p.y as f32))
            .collect();
        let region = FrameRegion::bounding(&corners, frame.width, frame.height);

        debug!(content = %content, ?region, "Detected QR code");
        symbols.push(DecodedSymbol {
            payload: content,
            region,
        });
    }

    if symbols.is_empty() {
        return Err(DecodeError::NotFound);
    }

    debug!(
        count = symbols.len(),
        total_ms = start.elapsed().as_millis(),
        "QR detection found codes"
    );
    Ok(symbols)
}
