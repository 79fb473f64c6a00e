// SPDX-License-Identifier: MPL-2.0

//! Scanner - camera barcode scanning with a managed capture session
//!
//! This library owns the camera lifecycle around a barcode decoder: device
//! enumeration, access requests, stream start/stop, device switching and
//! duplicate-scan suppression.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: The scan session state machine and its event channels
//! - [`backends`]: Camera capability traits and the V4L2 implementation
//! - [`frame_processor`]: Decoder trait, the multi-format reader and the QR detector
//! - [`config`]: User configuration handling
//! - [`terminal`]: Terminal frontend
//!
//! # Example
//!
//! ```ignore
//! let session = ScanSession::from_config(&Config::load()?);
//! let _sub = session.on_decode(|event| println!("{}", event.payload));
//! session.start(None).await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;
pub mod session;
pub mod terminal;

// Re-export commonly used types
pub use backends::camera::VideoDevice;
pub use config::Config;
pub use errors::{ScanError, ScanResult};
pub use session::{DecodeEvent, ScanSession, SessionOptions, SessionStatus, StartOutcome};
