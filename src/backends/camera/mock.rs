// SPDX-License-Identifier: GPL-3.0-only

//! In-memory capabilities for lifecycle tests
//!
//! `MockCapture` records every open/stop in order so tests can assert on
//! call ordering and on the number of streams alive at once.

use super::types::*;
use super::{DeviceEnumerator, MediaCapture, MediaStream};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use tokio::sync::{mpsc, oneshot};

pub struct MockEnumerator {
    result: Mutex<BackendResult<Vec<VideoDevice>>>,
    calls: AtomicUsize,
}

impl MockEnumerator {
    pub fn with_devices(ids: &[&str]) -> Arc<Self> {
        let devices = ids
            .iter()
            .map(|id| VideoDevice::new(*id, format!("Mock {}", id)))
            .collect();
        Arc::new(Self {
            result: Mutex::new(Ok(devices)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: BackendError) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Err(err)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_devices(&self, ids: &[&str]) {
        *self.result.lock().unwrap() = Ok(ids
            .iter()
            .map(|id| VideoDevice::new(*id, format!("Mock {}", id)))
            .collect());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn list_devices(&self) -> BoxFuture<'_, BackendResult<Vec<VideoDevice>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.result.lock().unwrap().clone();
        async move { result }.boxed()
    }
}

/// What the next `open` call does
pub enum OpenBehavior {
    Grant,
    Fail(BackendError),
    /// Suspend until the test resolves the gate (a pending permission prompt)
    Gated(oneshot::Receiver<BackendResult<()>>),
}

/// Observable capture events, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Requested(String),
    Opened(String),
    Stopped(String),
}

#[derive(Default)]
struct CaptureLog {
    events: Mutex<Vec<CaptureEvent>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    stop_threads: Mutex<HashMap<String, ThreadId>>,
}

impl CaptureLog {
    fn push(&self, event: CaptureEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct MockCapture {
    behaviors: Mutex<VecDeque<OpenBehavior>>,
    senders: Arc<Mutex<HashMap<String, mpsc::Sender<CameraFrame>>>>,
    log: Arc<CaptureLog>,
}

impl MockCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(VecDeque::new()),
            senders: Arc::new(Mutex::new(HashMap::new())),
            log: Arc::new(CaptureLog::default()),
        })
    }

    /// Queue the behavior of the next `open`; unqueued calls are granted
    pub fn push_behavior(&self, behavior: OpenBehavior) {
        self.behaviors.lock().unwrap().push_back(behavior);
    }

    /// Queue a gated open and return the handle that resolves it
    pub fn gate(&self) -> oneshot::Sender<BackendResult<()>> {
        let (tx, rx) = oneshot::channel();
        self.push_behavior(OpenBehavior::Gated(rx));
        tx
    }

    pub fn events(&self) -> Vec<CaptureEvent> {
        self.log.events.lock().unwrap().clone()
    }

    pub fn live_streams(&self) -> usize {
        self.log.live.load(Ordering::SeqCst)
    }

    pub fn max_live_streams(&self) -> usize {
        self.log.max_live.load(Ordering::SeqCst)
    }

    /// Thread that last stopped the stream on `device_id`
    pub fn stopped_on(&self, device_id: &str) -> Option<ThreadId> {
        self.log.stop_threads.lock().unwrap().get(device_id).copied()
    }

    /// Frame feed of the stream currently open on `device_id`
    pub fn frame_sender(&self, device_id: &str) -> Option<mpsc::Sender<CameraFrame>> {
        self.senders.lock().unwrap().get(device_id).cloned()
    }

    /// Close the frame feed of `device_id` as if the device vanished
    pub fn end_stream(&self, device_id: &str) {
        self.senders.lock().unwrap().remove(device_id);
    }
}

impl MediaCapture for MockCapture {
    fn open(&self, constraints: MediaConstraints) -> BoxFuture<'_, BackendResult<Box<dyn MediaStream>>> {
        let device_id = constraints.device_id.unwrap_or_else(|| "default".to_string());
        self.log.push(CaptureEvent::Requested(device_id.clone()));
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenBehavior::Grant);
        let log = Arc::clone(&self.log);
        let senders = Arc::clone(&self.senders);

        async move {
            match behavior {
                OpenBehavior::Grant => {}
                OpenBehavior::Fail(err) => return Err(err),
                OpenBehavior::Gated(gate) => gate
                    .await
                    .map_err(|_| BackendError::Other("gate dropped".into()))??,
            }

            let (tx, rx) = mpsc::channel(16);
            senders.lock().unwrap().insert(device_id.clone(), tx);
            log.push(CaptureEvent::Opened(device_id.clone()));
            let live = log.live.fetch_add(1, Ordering::SeqCst) + 1;
            log.max_live.fetch_max(live, Ordering::SeqCst);

            Ok(Box::new(MockStream {
                device_id,
                frames: Some(rx),
                live: true,
                log,
                senders,
            }) as Box<dyn MediaStream>)
        }
        .boxed()
    }
}

pub struct MockStream {
    device_id: String,
    frames: Option<FrameReceiver>,
    live: bool,
    log: Arc<CaptureLog>,
    senders: Arc<Mutex<HashMap<String, mpsc::Sender<CameraFrame>>>>,
}

impl MediaStream for MockStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        vec![TrackInfo {
            label: format!("mock {}", self.device_id),
            state: if self.live { TrackState::Live } else { TrackState::Ended },
        }]
    }

    fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    fn stop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        self.frames = None;
        self.senders.lock().unwrap().remove(&self.device_id);
        self.log.live.fetch_sub(1, Ordering::SeqCst);
        self.log
            .stop_threads
            .lock()
            .unwrap()
            .insert(self.device_id.clone(), std::thread::current().id());
        self.log.push(CaptureEvent::Stopped(self.device_id.clone()));
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frame whose pixels spell out `text`; paired with `TextDecoder`
pub fn text_frame(text: &str) -> CameraFrame {
    let bytes = text.as_bytes().to_vec();
    let width = bytes.len().max(1) as u32;
    let data = if bytes.is_empty() { vec![0] } else { bytes };
    CameraFrame::gray(width, 1, data)
}
