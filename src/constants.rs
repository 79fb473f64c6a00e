// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Window after a forwarded detection during which further detections are dropped
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1500);

/// Requested capture resolution (the decoder downsizes anyway, but a sharper
/// source helps with dense 1D symbols)
pub const DEFAULT_CAPTURE_WIDTH: u32 = 1920;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 1080;

/// Frames are downscaled to this maximum dimension before decoding
pub const DEFAULT_DECODER_MAX_DIMENSION: u32 = 640;

/// Capacity of the capture → decoder frame channel
///
/// Kept small so the decoder always sees a recent frame; the capture thread
/// drops frames when the channel is full.
pub const FRAME_CHANNEL_CAPACITY: usize = 4;

/// Number of mmap buffers requested from V4L2
pub const CAPTURE_BUFFER_COUNT: u32 = 4;

/// How long a capture thread blocks waiting for a frame before re-checking its stop signal
pub const CAPTURE_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Directory (under the platform config/cache dir) used by the scanner
pub const APP_DIR_NAME: &str = "scanner";

/// Config file name inside [`APP_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Log file written by the terminal UI (stdout belongs to the UI)
pub const TERMINAL_LOG_FILE_NAME: &str = "terminal.log";

/// Prefix used to build a display name for devices without a label
pub const UNLABELED_DEVICE_PREFIX: &str = "Camera";

/// Terminal UI timing and limits
pub mod ui {
    use std::time::Duration;

    /// Input poll interval (also the redraw cadence)
    pub const TICK: Duration = Duration::from_millis(16);

    /// Results kept in the on-screen list before the oldest are dropped
    pub const MAX_RESULTS: usize = 200;

    /// Width of the results panel in columns
    pub const RESULTS_PANEL_WIDTH: u16 = 42;
}
