// SPDX-License-Identifier: MPL-2.0

//! Frame processor module for barcode decoding
//!
//! The session treats the decoder as an opaque capability: it hands over a
//! frame and gets back symbols, a "nothing here" signal, or a fatal error.
//! Two implementations are bundled: a multi-format reader on `rxing` and a
//! QR-only detector on `rqrr`.

pub mod tasks;
pub mod types;

pub use tasks::qr_detector::{self, QrDetector};
pub use tasks::{BarcodeReader, DecoderKind};
pub use types::{BarcodeDecoder, DecodeError, DecodedSymbol, FrameRegion};
