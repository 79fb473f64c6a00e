// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing tasks
//!
//! Decoder implementations that plug into the scan session.

pub mod barcode_reader;
pub mod luma;
pub mod qr_detector;

pub use barcode_reader::BarcodeReader;
pub use qr_detector::QrDetector;

use super::types::BarcodeDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which decoder a session feeds frames to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderKind {
    /// 1D retail codes (EAN, UPC) plus the common 2D symbologies
    #[default]
    MultiFormat,
    /// QR codes only; lighter on CPU
    Qr,
}

impl DecoderKind {
    /// Build the decoder, downscaling frames to `max_dimension`
    pub fn build(self, max_dimension: u32) -> Arc<dyn BarcodeDecoder> {
        match self {
            DecoderKind::MultiFormat => Arc::new(BarcodeReader::with_max_dimension(max_dimension)),
            DecoderKind::Qr => Arc::new(QrDetector::with_max_dimension(max_dimension)),
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderKind::MultiFormat => write!(f, "multi-format"),
            DecoderKind::Qr => write!(f, "qr"),
        }
    }
}
