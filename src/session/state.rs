// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle state

use crate::backends::camera::{MediaStream, VideoDevice};
use crate::errors::ScanError;
use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Observable lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Constructed, never started
    Idle,
    /// Waiting for device access
    Requesting,
    /// Streaming and decoding
    Active,
    /// Stopped by the caller
    Stopped,
    /// Last attempt failed, or the stream broke; `start` again to recover
    Errored,
}

impl SessionStatus {
    /// Whether `start` is allowed from this status
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Errored)
    }

    /// Whether `switch_device` is allowed from this status
    pub fn can_switch(&self) -> bool {
        matches!(self, Self::Active | Self::Requesting)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Requesting => "Requesting",
            Self::Active => "Active",
            Self::Stopped => "Stopped",
            Self::Errored => "Errored",
        };
        write!(f, "{}", name)
    }
}

/// Result of a `start` or `switch_device` call that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The session is streaming from this device
    Active(VideoDevice),
    /// The attempt was superseded by `stop` or a newer `switch_device`
    Cancelled,
}

/// Counters kept for the lifetime of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Symbols decoded, before the cooldown filter
    pub detections: u64,
    /// Symbols delivered to decode subscribers
    pub forwarded: u64,
    /// Symbols dropped by the cooldown
    pub suppressed: u64,
    /// Frames in which the decoder found nothing
    pub not_found: u64,
}

/// Point-in-time view of a session, for display
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub device: Option<VideoDevice>,
    pub last_error: Option<ScanError>,
    pub cooldown_active: bool,
    pub stats: SessionStats,
}

/// An open stream plus the task decoding its frames
pub(crate) struct Pipeline {
    pub stream: Box<dyn MediaStream>,
    pub decode_task: JoinHandle<()>,
}

impl Pipeline {
    /// Stop decoding and release the device
    pub fn release(mut self) {
        self.decode_task.abort();
        self.stream.stop();
    }
}

/// Internal lifecycle phase; owns whatever resources the phase holds
pub(crate) enum Phase {
    Idle,
    Requesting {
        attempt: u64,
        device_id: Option<String>,
        /// Dropping or firing this cancels the pending request
        cancel: Option<oneshot::Sender<()>>,
    },
    Active {
        device: VideoDevice,
        pipeline: Pipeline,
    },
    Stopped,
    /// The stream may still be held after a decoder failure
    Errored {
        device: Option<VideoDevice>,
        pipeline: Option<Pipeline>,
    },
}

impl Phase {
    pub fn status(&self) -> SessionStatus {
        match self {
            Phase::Idle => SessionStatus::Idle,
            Phase::Requesting { .. } => SessionStatus::Requesting,
            Phase::Active { .. } => SessionStatus::Active,
            Phase::Stopped => SessionStatus::Stopped,
            Phase::Errored { .. } => SessionStatus::Errored,
        }
    }

    pub fn device(&self) -> Option<&VideoDevice> {
        match self {
            Phase::Active { device, .. } => Some(device),
            Phase::Errored { device, .. } => device.as_ref(),
            _ => None,
        }
    }

    /// Whether tearing this phase down stops a stream
    pub fn holds_stream(&self) -> bool {
        matches!(
            self,
            Phase::Active { .. } | Phase::Errored { pipeline: Some(_), .. }
        )
    }

    /// Release every resource held by this phase
    pub fn teardown(self) {
        match self {
            Phase::Requesting { cancel, .. } => {
                if let Some(cancel) = cancel {
                    let _ = cancel.send(());
                }
            }
            Phase::Active { pipeline, .. } => pipeline.release(),
            Phase::Errored {
                pipeline: Some(pipeline),
                ..
            } => pipeline.release(),
            _ => {}
        }
    }
}
