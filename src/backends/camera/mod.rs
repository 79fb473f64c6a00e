// SPDX-License-Identifier: MPL-2.0

//! Camera capability abstraction
//!
//! The scan session never talks to the platform directly. It goes through
//! two capability traits, so the V4L2 implementation can be swapped for a
//! mock in tests:
//!
//! ```text
//! ┌─────────────────────┐
//! │     ScanSession     │  ← Lifecycle, cooldown, subscriptions
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ DeviceEnumerator +  │  ← Common interface
//! │    MediaCapture     │
//! └──────────┬──────────┘
//!            │
//!            ▼
//!        ┌──────┐
//!        │ V4L2 │  ← Concrete implementation
//!        └──────┘
//! ```

pub mod format_converters;
pub mod frame_loop;
pub mod types;
pub mod v4l2;

#[cfg(test)]
pub(crate) mod mock;

pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;

/// Lists the video capture devices available right now
///
/// Each call re-queries the platform; nothing is cached or watched.
pub trait DeviceEnumerator: Send + Sync {
    fn list_devices(&self) -> BoxFuture<'_, BackendResult<Vec<VideoDevice>>>;
}

/// Opens live video streams
pub trait MediaCapture: Send + Sync {
    /// Request access to a device and start streaming
    ///
    /// May suspend for as long as the platform needs (for example while the
    /// user answers a permission prompt). Dropping the returned future before
    /// it completes must not leave a device open.
    fn open(&self, constraints: MediaConstraints) -> BoxFuture<'_, BackendResult<Box<dyn MediaStream>>>;
}

/// A live stream handle returned by [`MediaCapture::open`]
pub trait MediaStream: Send {
    /// Device this stream was opened on
    fn device_id(&self) -> &str;

    /// Tracks carried by the stream
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Take the frame receiver; returns `None` after the first call
    fn take_frames(&mut self) -> Option<FrameReceiver>;

    /// Stop every track and release the hardware
    ///
    /// Idempotent. When this returns, the device is closed.
    fn stop(&mut self);

    /// Whether any track is still live
    fn is_live(&self) -> bool {
        self.tracks().iter().any(|t| t.state == TrackState::Live)
    }
}

/// Get the platform backend (V4L2) as a pair of capabilities
pub fn default_backend() -> (Arc<dyn DeviceEnumerator>, Arc<dyn MediaCapture>) {
    let backend = Arc::new(v4l2::V4l2Backend::new());
    (backend.clone(), backend)
}
