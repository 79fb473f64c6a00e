// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera backend
//!
//! Enumerates `/dev/video*` capture nodes and streams from them with
//! memory-mapped buffers. Each open stream owns one capture thread which
//! converts frames to Gray8 before handing them to the decoder.

use super::format_converters::{gray_without_stride, mjpeg_to_gray, yuyv_to_gray};
use super::frame_loop::{CaptureLoopController, LoopAction, readiness_lost};
use super::types::*;
use super::{DeviceEnumerator, MediaCapture, MediaStream};
use crate::constants::{CAPTURE_BUFFER_COUNT, CAPTURE_POLL_TIMEOUT, FRAME_CHANNEL_CAPACITY};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Default device node directory
const DEV_DIR: &str = "/dev";

/// Present whenever the kernel has video4linux support loaded
const V4L2_SYSFS_DIR: &str = "/sys/class/video4linux";

/// V4L2 backend implementing both enumeration and capture
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    dev_dir: PathBuf,
    sysfs_dir: PathBuf,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::with_roots(DEV_DIR, V4L2_SYSFS_DIR)
    }

    /// Backend scanning alternative directories (used by tests)
    pub fn with_roots(dev_dir: impl Into<PathBuf>, sysfs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            sysfs_dir: sysfs_dir.into(),
        }
    }

    async fn enumerate(&self) -> BackendResult<Vec<VideoDevice>> {
        let dev_dir = self.dev_dir.clone();
        let sysfs_dir = self.sysfs_dir.clone();
        tokio::task::spawn_blocking(move || enumerate_capture_devices(&dev_dir, &sysfs_dir))
            .await
            .map_err(|e| BackendError::Other(format!("enumeration task failed: {}", e)))?
    }
}

impl DeviceEnumerator for V4l2Backend {
    fn list_devices(&self) -> BoxFuture<'_, BackendResult<Vec<VideoDevice>>> {
        self.enumerate().boxed()
    }
}

impl MediaCapture for V4l2Backend {
    fn open(&self, constraints: MediaConstraints) -> BoxFuture<'_, BackendResult<Box<dyn MediaStream>>> {
        async move {
            let path = match constraints.device_id.clone() {
                Some(id) => id,
                None => self
                    .enumerate()
                    .await?
                    .into_iter()
                    .next()
                    .map(|d| d.id)
                    .ok_or_else(|| BackendError::DeviceNotFound("no capture devices".into()))?,
            };

            if constraints.facing != FacingMode::default() {
                debug!(facing = %constraints.facing, "V4L2 exposes no facing information; ignoring");
            }

            let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            let name = format!("v4l2-capture:{}", path);
            let init_path = path.clone();
            let (width, height) = (constraints.width, constraints.height);

            let (controller, ready) = CaptureLoopController::start_with_init(
                &name,
                move || open_capture(&init_path, width, height),
                move |state| capture_frame(state, &frame_tx),
            );
            let mut pending = PendingCapture(Some(controller));

            // Dropping this future here stops the thread off the runtime
            match ready.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(readiness_lost(&name)),
            }

            info!(device = %path, constraints = %constraints, "V4L2 stream open");

            Ok(Box::new(V4l2Stream {
                device_id: path,
                controller: pending.0.take(),
                frames: Some(frame_rx),
            }) as Box<dyn MediaStream>)
        }
        .boxed()
    }
}

/// Capture thread of an open that has not been handed out yet
struct PendingCapture(Option<CaptureLoopController>);

impl Drop for PendingCapture {
    fn drop(&mut self) {
        if let Some(controller) = self.0.take() {
            debug!("Abandoned camera open, stopping capture thread");
            controller.stop_detached();
        }
    }
}

/// Scan a device directory for V4L2 nodes that can capture video
fn enumerate_capture_devices(dev_dir: &Path, sysfs_dir: &Path) -> BackendResult<Vec<VideoDevice>> {
    if !sysfs_dir.exists() {
        return Err(BackendError::NotAvailable(format!(
            "{} is missing; the kernel has no video capture support loaded",
            sysfs_dir.display()
        )));
    }

    let entries = std::fs::read_dir(dev_dir).map_err(|e| {
        BackendError::EnumerationFailed(format!("cannot read {}: {}", dev_dir.display(), e))
    })?;

    // Sort numerically so video10 comes after video2
    let mut nodes: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("video")?.parse().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    nodes.sort_by_key(|(index, _)| *index);

    let mut devices = Vec::new();
    let mut denied = 0usize;

    for (_, path) in nodes {
        let path_str = path.to_string_lossy().to_string();

        let dev = match Device::with_path(&path) {
            Ok(dev) => dev,
            Err(e) => {
                let err = BackendError::from(e);
                if matches!(err, BackendError::PermissionDenied(_)) {
                    denied += 1;
                }
                debug!(path = %path_str, error = %err, "Skipping video node");
                continue;
            }
        };

        let caps = match dev.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                debug!(path = %path_str, error = %e, "VIDIOC_QUERYCAP failed");
                continue;
            }
        };

        // UVC cameras expose a second metadata-only node per camera
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            trace!(path = %path_str, card = %caps.card, "Not a capture node");
            continue;
        }

        debug!(path = %path_str, card = %caps.card, driver = %caps.driver, "Found capture device");
        devices.push(VideoDevice::new(path_str, caps.card));
    }

    if devices.is_empty() && denied > 0 {
        return Err(BackendError::PermissionDenied(format!(
            "{} video node(s) could not be opened",
            denied
        )));
    }

    Ok(devices)
}

/// Frame encodings the capture thread can reduce to luma
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureEncoding {
    Yuyv,
    Mjpeg,
    Grey,
}

impl CaptureEncoding {
    const PREFERENCE: [CaptureEncoding; 3] = [Self::Yuyv, Self::Mjpeg, Self::Grey];

    fn fourcc(&self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Mjpeg => FourCC::new(b"MJPG"),
            Self::Grey => FourCC::new(b"GREY"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|e| e.fourcc() == fourcc)
    }

    /// Bytes per pixel of the uncompressed encodings; MJPEG has no rows
    fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Yuyv => 2,
            Self::Grey => 1,
            Self::Mjpeg => 0,
        }
    }

    /// Row length in bytes, for drivers that report a zero or short stride
    fn row_stride(&self, reported: u32, width: u32) -> u32 {
        reported.max(width * self.bytes_per_pixel())
    }
}

/// Per-thread capture state; never leaves the capture thread
struct CaptureState {
    stream: Stream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    stride: u32,
    encoding: CaptureEncoding,
}

fn open_capture(path: &str, width: u32, height: u32) -> BackendResult<CaptureState> {
    let dev = Device::with_path(path)?;
    let (format, encoding) = negotiate_format(&dev, width, height)?;

    info!(
        path,
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        "V4L2 capture format configured"
    );

    let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, CAPTURE_BUFFER_COUNT)?;
    stream.set_timeout(CAPTURE_POLL_TIMEOUT);

    Ok(CaptureState {
        stream,
        _device: dev,
        width: format.width,
        height: format.height,
        stride: encoding.row_stride(format.stride, format.width),
        encoding,
    })
}

/// Ask for each supported encoding in turn; drivers may substitute their own
fn negotiate_format(dev: &Device, width: u32, height: u32) -> BackendResult<(Format, CaptureEncoding)> {
    for encoding in CaptureEncoding::PREFERENCE {
        let requested = Format::new(width, height, encoding.fourcc());
        match dev.set_format(&requested) {
            Ok(actual) => {
                if let Some(actual_encoding) = CaptureEncoding::from_fourcc(actual.fourcc) {
                    return Ok((actual, actual_encoding));
                }
                debug!(requested = %requested.fourcc, got = %actual.fourcc, "Driver substituted an unusable format");
            }
            Err(e) => {
                debug!(fourcc = %requested.fourcc, error = %e, "Format rejected");
            }
        }
    }

    Err(BackendError::FormatNotSupported(
        "device offers none of YUYV, MJPG, GREY".into(),
    ))
}

/// One iteration of the capture loop
fn capture_frame(state: &mut CaptureState, sender: &FrameSender) -> LoopAction {
    if sender.is_closed() {
        return LoopAction::Stop;
    }

    let (width, height, stride, encoding) = (state.width, state.height, state.stride, state.encoding);

    let buf = match state.stream.next() {
        Ok((buf, _meta)) => buf,
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            return LoopAction::Continue;
        }
        Err(e) => {
            let err = BackendError::from(e);
            warn!(error = %err, "Failed to capture frame");
            // Unplugged devices never come back on the same handle
            return if matches!(err, BackendError::DeviceNotFound(_)) {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            };
        }
    };

    let captured_at = Instant::now();
    let mut frame = match encoding {
        CaptureEncoding::Yuyv => CameraFrame::gray(width, height, yuyv_to_gray(buf, width, height, stride)),
        CaptureEncoding::Grey => {
            CameraFrame::gray(width, height, gray_without_stride(buf, width, height, stride))
        }
        CaptureEncoding::Mjpeg => match mjpeg_to_gray(buf) {
            Ok((w, h, luma)) => CameraFrame::gray(w, h, luma),
            Err(e) => {
                // Webcams routinely emit a truncated JPEG while settling
                trace!(error = %e, "Dropping undecodable MJPEG frame");
                return LoopAction::Continue;
            }
        },
    };
    frame.captured_at = captured_at;

    match sender.try_send(frame) {
        Ok(()) => LoopAction::Continue,
        Err(TrySendError::Full(_)) => {
            trace!("Frame channel full, dropping frame");
            LoopAction::Continue
        }
        Err(TrySendError::Closed(_)) => LoopAction::Stop,
    }
}

/// An open V4L2 stream; one video track backed by a capture thread
pub struct V4l2Stream {
    device_id: String,
    controller: Option<CaptureLoopController>,
    frames: Option<FrameReceiver>,
}

impl MediaStream for V4l2Stream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        let live = self
            .controller
            .as_ref()
            .map(|c| c.is_running())
            .unwrap_or(false);
        vec![TrackInfo {
            label: format!("video {}", self.device_id),
            state: if live { TrackState::Live } else { TrackState::Ended },
        }]
    }

    fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    fn stop(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
            info!(device = %self.device_id, "V4L2 stream stopped");
        }
        self.frames = None;
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scanner-v4l2-{}-{}", tag, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn test_missing_subsystem_is_not_available() {
        let dev = scratch_dir("dev");
        let result = enumerate_capture_devices(&dev, &dev.join("no-such-sysfs"));
        assert!(matches!(result, Err(BackendError::NotAvailable(_))));
    }

    #[test]
    fn test_unreadable_dev_dir_fails_enumeration() {
        let sysfs = scratch_dir("sysfs");
        let result = enumerate_capture_devices(&sysfs.join("missing-dev"), &sysfs);
        assert!(matches!(result, Err(BackendError::EnumerationFailed(_))));
    }

    #[test]
    fn test_non_device_nodes_are_skipped() {
        let dev = scratch_dir("dev-files");
        // Regular files named like device nodes fail QUERYCAP and are skipped
        std::fs::write(dev.join("video0"), b"").expect("write");
        std::fs::write(dev.join("null"), b"").expect("write");
        let devices = enumerate_capture_devices(&dev, &dev).expect("enumerate");
        assert!(devices.is_empty());
    }

    #[test]
    fn test_encoding_lookup_by_fourcc() {
        assert_eq!(
            CaptureEncoding::from_fourcc(FourCC::new(b"MJPG")),
            Some(CaptureEncoding::Mjpeg)
        );
        assert_eq!(CaptureEncoding::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_missing_stride_falls_back_to_packed_rows() {
        assert_eq!(CaptureEncoding::Yuyv.row_stride(0, 640), 1280);
        assert_eq!(CaptureEncoding::Grey.row_stride(0, 640), 640);
        // Padded rows reported by the driver are kept
        assert_eq!(CaptureEncoding::Yuyv.row_stride(1344, 640), 1344);
    }

    #[test]
    fn test_yuyv_rows_split_at_fallback_stride() {
        // Two rows of two pixels: Y values 1,2 then 3,4
        let buf = [1, 0, 2, 0, 3, 0, 4, 0];
        let stride = CaptureEncoding::Yuyv.row_stride(0, 2);
        assert_eq!(yuyv_to_gray(&buf, 2, 2, stride), vec![1, 2, 3, 4]);
    }
}
