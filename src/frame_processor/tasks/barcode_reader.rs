// SPDX-License-Identifier: GPL-3.0-only

//! Multi-format barcode reading
//!
//! Wraps the `rxing` port of ZXing. One pass looks for every format it
//! knows, which covers the retail 1D symbologies (EAN-13, EAN-8, UPC-A,
//! UPC-E) as well as QR, Data Matrix and friends.

use super::luma::prepare;
use crate::backends::camera::CameraFrame;
use crate::constants::DEFAULT_DECODER_MAX_DIMENSION;
use crate::frame_processor::types::{BarcodeDecoder, DecodeError, DecodedSymbol, FrameRegion};
use tracing::{debug, trace};

/// Decoder for 1D and 2D symbologies
pub struct BarcodeReader {
    max_dimension: u32,
}

impl Default for BarcodeReader {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeReader {
    pub fn new() -> Self {
        Self {
            max_dimension: DEFAULT_DECODER_MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }
}

impl BarcodeDecoder for BarcodeReader {
    fn decode(&self, frame: &CameraFrame) -> Result<Vec<DecodedSymbol>, DecodeError> {
        let start = std::time::Instant::now();
        let luma = prepare(frame, self.max_dimension)?;
        let scale = luma.scale;

        // rxing reports "nothing here" and unreadable symbols (bad checksum,
        // damaged format info) alike as errors; none of them end the scan
        let results = match rxing::helpers::detect_multiple_in_luma(luma.plane, luma.width, luma.height) {
            Ok(results) => results,
            Err(e) => {
                trace!(error = ?e, elapsed_ms = start.elapsed().as_millis(), "No barcode in frame");
                return Err(DecodeError::NotFound);
            }
        };

        let symbols: Vec<DecodedSymbol> = results
            .iter()
            .map(|result| {
                let corners: Vec<(f32, f32)> = result
                    .getPoints()
                    .iter()
                    .map(|p| (p.x * scale, p.y * scale))
                    .collect();
                let region = FrameRegion::bounding(&corners, frame.width, frame.height);
                debug!(format = ?result.getBarcodeFormat(), content = %result.getText(), "Detected barcode");
                DecodedSymbol {
                    payload: result.getText().to_string(),
                    region,
                }
            })
            .collect();

        if symbols.is_empty() {
            return Err(DecodeError::NotFound);
        }
        debug!(
            count = symbols.len(),
            total_ms = start.elapsed().as_millis(),
            "Barcode detection found codes"
        );
        Ok(symbols)
    }

    fn name(&self) -> &'static str {
        "multi-format"
    }
}
