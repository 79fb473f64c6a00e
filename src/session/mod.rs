// SPDX-License-Identifier: GPL-3.0-only

//! Scan session lifecycle
//!
//! A [`ScanSession`] owns one camera stream at a time and feeds its frames to
//! a barcode decoder:
//!
//! ```text
//! Idle --start--> Requesting --granted--> Active --stop--> Stopped
//! Requesting --denied--> Errored
//! Active --switch_device--> Requesting
//! Active --decoder fatal error--> Errored (stream kept until stop)
//! Errored/Stopped --start--> Requesting
//! ```
//!
//! Every start attempt gets a generation number. Grants, failures and
//! detections that belong to a superseded attempt are discarded, so a
//! permission prompt answered after `stop()` never leaves a device open.

pub mod cooldown;
pub mod events;
pub mod state;

#[cfg(test)]
mod tests;

pub use cooldown::{Clock, Cooldown, SystemClock};
pub use events::{DecodeEvent, Subscription};
pub use state::{SessionSnapshot, SessionStats, SessionStatus, StartOutcome};

use crate::backends::camera::{
    self, CameraFrame, DeviceEnumerator, FacingMode, FrameReceiver, MediaCapture,
    MediaConstraints, MediaStream, VideoDevice,
};
use crate::config::Config;
use crate::constants::{DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH, DEFAULT_COOLDOWN};
use crate::errors::{ScanError, ScanResult};
use crate::frame_processor::{BarcodeDecoder, DecodeError, DecodedSymbol};
use events::SubscriberList;
use futures::Stream;
use state::{Phase, Pipeline};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Tunables for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Window after a forwarded detection during which detections are dropped
    pub cooldown: Duration,
    pub capture_width: u32,
    pub capture_height: u32,
    pub facing: FacingMode,
    /// Release the camera when the decoder fails instead of keeping the
    /// stream (and preview) running until `stop`
    pub release_on_decoder_error: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            capture_width: DEFAULT_CAPTURE_WIDTH,
            capture_height: DEFAULT_CAPTURE_HEIGHT,
            facing: FacingMode::default(),
            release_on_decoder_error: false,
        }
    }
}

struct SessionState {
    phase: Phase,
    /// Generation of the most recent start attempt
    attempt: u64,
    cooldown: Cooldown,
    last_error: Option<ScanError>,
    stats: SessionStats,
}

impl SessionState {
    fn is_requesting(&self, attempt: u64) -> bool {
        matches!(self.phase, Phase::Requesting { attempt: a, .. } if a == attempt)
    }

    fn is_active(&self, attempt: u64) -> bool {
        self.attempt == attempt && matches!(self.phase, Phase::Active { .. })
    }

    /// Active, or errored while still holding this attempt's stream
    fn owns_stream(&self, attempt: u64) -> bool {
        self.attempt == attempt
            && matches!(
                self.phase,
                Phase::Active { .. } | Phase::Errored { pipeline: Some(_), .. }
            )
    }
}

struct SessionInner {
    id: Uuid,
    enumerator: Arc<dyn DeviceEnumerator>,
    capture: Arc<dyn MediaCapture>,
    decoder: Arc<dyn BarcodeDecoder>,
    clock: Arc<dyn Clock>,
    options: SessionOptions,
    /// Never held across an `.await`
    state: Mutex<SessionState>,
    decode_subscribers: Arc<SubscriberList<DecodeEvent>>,
    error_subscribers: Arc<SubscriberList<ScanError>>,
    status_tx: watch::Sender<SessionStatus>,
    preview_tx: watch::Sender<Option<CameraFrame>>,
}

/// Handle to a scan session
///
/// Cloning is cheap; all clones drive the same session. The camera is
/// released when `stop` is called or the last handle is dropped.
#[derive(Clone)]
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

impl ScanSession {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        capture: Arc<dyn MediaCapture>,
        decoder: Arc<dyn BarcodeDecoder>,
        options: SessionOptions,
    ) -> Self {
        Self::new_with_clock(enumerator, capture, decoder, options, Arc::new(SystemClock))
    }

    /// Build a session with an explicit time source for the cooldown
    pub fn new_with_clock(
        enumerator: Arc<dyn DeviceEnumerator>,
        capture: Arc<dyn MediaCapture>,
        decoder: Arc<dyn BarcodeDecoder>,
        options: SessionOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (preview_tx, _) = watch::channel(None);
        info!(
            session = %id,
            decoder = decoder.name(),
            cooldown_ms = options.cooldown.as_millis() as u64,
            "Scan session created"
        );

        Self {
            inner: Arc::new(SessionInner {
                id,
                enumerator,
                capture,
                decoder,
                clock,
                state: Mutex::new(SessionState {
                    phase: Phase::Idle,
                    attempt: 0,
                    cooldown: Cooldown::new(options.cooldown),
                    last_error: None,
                    stats: SessionStats::default(),
                }),
                options,
                decode_subscribers: SubscriberList::new(),
                error_subscribers: SubscriberList::new(),
                status_tx,
                preview_tx,
            }),
        }
    }

    /// Session on the platform camera backend with the configured decoder
    pub fn from_config(config: &Config) -> Self {
        let (enumerator, capture) = camera::default_backend();
        let decoder = config.decoder.build(config.decoder_max_dimension);
        Self::new(enumerator, capture, decoder, config.session_options())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().unwrap().phase.status()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Latest frame handed to the decoder; `None` while no stream is open
    pub fn preview(&self) -> watch::Receiver<Option<CameraFrame>> {
        self.inner.preview_tx.subscribe()
    }

    pub fn active_device(&self) -> Option<VideoDevice> {
        self.inner.state.lock().unwrap().phase.device().cloned()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock().unwrap();
        SessionSnapshot {
            status: state.phase.status(),
            device: state.phase.device().cloned(),
            last_error: state.last_error.clone(),
            cooldown_active: state.cooldown.is_suppressing(now),
            stats: state.stats,
        }
    }

    /// Enumerate capture devices
    ///
    /// Queries the platform on every call.
    pub async fn list_devices(&self) -> ScanResult<Vec<VideoDevice>> {
        let devices = self
            .inner
            .enumerator
            .list_devices()
            .await
            .map_err(ScanError::enumeration)?;
        debug!(session = %self.inner.id, count = devices.len(), "Enumerated cameras");
        Ok(devices)
    }

    /// Acquire a camera and start decoding
    ///
    /// Without `device_id` the first enumerated device is used. An unknown
    /// `device_id` falls back to the first device after reporting
    /// `DeviceNotFound` on the error channel.
    ///
    /// Returns `Ok(StartOutcome::Cancelled)` when `stop` or `switch_device`
    /// superseded this attempt while it was pending.
    pub async fn start(&self, device_id: Option<&str>) -> ScanResult<StartOutcome> {
        let (attempt, cancel, previous) = {
            let mut state = self.inner.state.lock().unwrap();
            let status = state.phase.status();
            if !status.can_start() {
                drop(state);
                return Err(self.inner.invalid_state("start", status));
            }
            let (attempt, cancel) = self.inner.begin_attempt(&mut state, device_id);
            let previous = std::mem::replace(
                &mut state.phase,
                Phase::Requesting {
                    attempt,
                    device_id: device_id.map(str::to_owned),
                    cancel: Some(cancel.0),
                },
            );
            self.inner.publish_status(&state);
            (attempt, cancel.1, previous)
        };
        // A stream kept after a decoder failure goes before the new request
        self.inner.release(previous).await;

        info!(
            session = %self.inner.id,
            attempt,
            device = device_id.unwrap_or("<default>"),
            "Requesting camera"
        );
        self.inner.run_attempt(attempt, device_id, cancel).await
    }

    /// `start` that gives up when `interrupt` completes first
    ///
    /// On interrupt the session is stopped, so a grant arriving later is
    /// released, and `Ok(StartOutcome::Cancelled)` is returned.
    pub async fn start_until(
        &self,
        device_id: Option<&str>,
        interrupt: impl Future<Output = ()>,
    ) -> ScanResult<StartOutcome> {
        tokio::select! {
            outcome = self.start(device_id) => outcome,
            _ = interrupt => {
                info!(session = %self.inner.id, "Camera request interrupted");
                let session = self.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || session.stop()).await {
                    warn!(session = %self.inner.id, error = %e, "Stop task failed");
                }
                Ok(StartOutcome::Cancelled)
            }
        }
    }

    /// Replace the current camera with `device_id`
    ///
    /// The current stream is stopped (or the pending request cancelled)
    /// before the new device is requested.
    pub async fn switch_device(&self, device_id: &str) -> ScanResult<StartOutcome> {
        let (attempt, cancel, previous) = {
            let mut state = self.inner.state.lock().unwrap();
            let status = state.phase.status();
            if !status.can_switch() {
                drop(state);
                return Err(self.inner.invalid_state("switch device", status));
            }
            let (attempt, cancel) = self.inner.begin_attempt(&mut state, Some(device_id));
            let previous = std::mem::replace(
                &mut state.phase,
                Phase::Requesting {
                    attempt,
                    device_id: Some(device_id.to_owned()),
                    cancel: Some(cancel.0),
                },
            );
            self.inner.publish_status(&state);
            (attempt, cancel.1, previous)
        };

        info!(
            session = %self.inner.id,
            attempt,
            from = previous.device().map(|d| d.id.as_str()).unwrap_or("<pending>"),
            to = device_id,
            "Switching camera"
        );
        self.inner.release(previous).await;
        self.inner.preview_tx.send_replace(None);

        self.inner.run_attempt(attempt, Some(device_id), cancel).await
    }

    /// Stop the session and release the camera
    ///
    /// Idempotent and callable from any state. A pending `start` is
    /// cancelled; if its grant still arrives the stream is released at once.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Register a callback for forwarded detections
    pub fn on_decode(&self, callback: impl Fn(&DecodeEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.decode_subscribers.subscribe(callback)
    }

    /// Register a callback for every error the session reports
    pub fn on_error(&self, callback: impl Fn(&ScanError) + Send + Sync + 'static) -> Subscription {
        self.inner.error_subscribers.subscribe(callback)
    }

    /// Forwarded detections as an async stream
    ///
    /// The stream ends when the session is dropped.
    pub fn decode_stream(&self) -> impl Stream<Item = DecodeEvent> + Send + 'static {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.on_decode(move |event| {
            let _ = tx.send(event.clone());
        });

        async_stream::stream! {
            let _subscription = subscription;
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

type CancelPair = (oneshot::Sender<()>, oneshot::Receiver<()>);

impl SessionInner {
    fn begin_attempt(&self, state: &mut SessionState, device_id: Option<&str>) -> (u64, CancelPair) {
        state.attempt += 1;
        trace!(session = %self.id, attempt = state.attempt, ?device_id, "New start attempt");
        (state.attempt, oneshot::channel())
    }

    /// Push the current status to watchers; called with the state lock held
    /// so watchers never observe statuses out of order
    fn publish_status(&self, state: &SessionState) {
        self.status_tx.send_replace(state.phase.status());
    }

    fn report(&self, error: ScanError) {
        self.state.lock().unwrap().last_error = Some(error.clone());
        warn!(session = %self.id, kind = error.kind(), error = %error, "Session error");
        self.error_subscribers.emit(&error);
    }

    fn invalid_state(&self, operation: &'static str, status: SessionStatus) -> ScanError {
        let error = ScanError::InvalidState { operation, status };
        self.report(error.clone());
        error
    }

    /// Tear down a replaced phase on the blocking pool
    ///
    /// Stopping a stream joins its capture thread, which must not happen on
    /// a runtime worker.
    async fn release(&self, previous: Phase) {
        if !previous.holds_stream() {
            previous.teardown();
            return;
        }
        if let Err(e) = tokio::task::spawn_blocking(move || previous.teardown()).await {
            warn!(session = %self.id, error = %e, "Camera release task failed");
        }
    }

    async fn run_attempt(
        self: &Arc<Self>,
        attempt: u64,
        device_id: Option<&str>,
        cancel: oneshot::Receiver<()>,
    ) -> ScanResult<StartOutcome> {
        // Fires on an explicit cancel and when the sender is dropped; either
        // way the attempt is no longer wanted and the open future is dropped
        let acquired = tokio::select! {
            biased;
            _ = cancel => {
                debug!(session = %self.id, attempt, "Camera request cancelled");
                return Ok(StartOutcome::Cancelled);
            }
            result = self.acquire(device_id) => result,
        };

        match acquired {
            Ok((device, mut stream)) => match stream.take_frames() {
                Some(frames) => Ok(self.activate(attempt, device, stream, frames)),
                None => {
                    stream.stop();
                    let error = ScanError::DeviceUnavailable(format!("{}: stream has no video", device.id));
                    self.fail_attempt(attempt, error)
                }
            },
            Err(error) => self.fail_attempt(attempt, error),
        }
    }

    async fn acquire(&self, requested: Option<&str>) -> ScanResult<(VideoDevice, Box<dyn MediaStream>)> {
        let devices = self
            .enumerator
            .list_devices()
            .await
            .map_err(ScanError::enumeration)?;
        let device = self.select_device(&devices, requested)?;

        let constraints = MediaConstraints {
            device_id: Some(device.id.clone()),
            width: self.options.capture_width,
            height: self.options.capture_height,
            facing: self.options.facing,
        };
        debug!(session = %self.id, %constraints, "Opening camera");
        let stream = self.capture.open(constraints).await?;
        Ok((device, stream))
    }

    fn select_device(&self, devices: &[VideoDevice], requested: Option<&str>) -> ScanResult<VideoDevice> {
        let Some(first) = devices.first() else {
            let what = requested.unwrap_or("no video capture devices present");
            return Err(ScanError::DeviceNotFound(what.to_string()));
        };

        let Some(id) = requested else {
            return Ok(first.clone());
        };
        if let Some(device) = devices.iter().find(|d| d.id == id) {
            return Ok(device.clone());
        }

        warn!(session = %self.id, requested = id, fallback = %first.id, "Requested camera missing, using first camera");
        self.report(ScanError::DeviceNotFound(format!("{} (using {})", id, first.id)));
        Ok(first.clone())
    }

    fn activate(
        self: &Arc<Self>,
        attempt: u64,
        device: VideoDevice,
        mut stream: Box<dyn MediaStream>,
        frames: FrameReceiver,
    ) -> StartOutcome {
        let mut state = self.state.lock().unwrap();
        if !state.is_requesting(attempt) {
            drop(state);
            info!(session = %self.id, attempt, device = %device.id, "Releasing camera granted after cancellation");
            stream.stop();
            return StartOutcome::Cancelled;
        }

        let decode_task = tokio::spawn(decode_loop(Arc::downgrade(self), attempt, device.id.clone(), frames));
        state.phase = Phase::Active {
            device: device.clone(),
            pipeline: Pipeline { stream, decode_task },
        };
        self.publish_status(&state);
        drop(state);

        info!(session = %self.id, attempt, device = %device.id, label = %device.label, "Camera active");
        StartOutcome::Active(device)
    }

    fn fail_attempt(&self, attempt: u64, error: ScanError) -> ScanResult<StartOutcome> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_requesting(attempt) {
                debug!(session = %self.id, attempt, %error, "Ignoring failure of superseded attempt");
                return Ok(StartOutcome::Cancelled);
            }
            state.phase = Phase::Errored {
                device: None,
                pipeline: None,
            };
            self.publish_status(&state);
        }
        self.report(error.clone());
        Err(error)
    }

    fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap();
            if matches!(state.phase, Phase::Stopped) {
                return;
            }
            let previous = std::mem::replace(&mut state.phase, Phase::Stopped);
            self.publish_status(&state);
            previous
        };
        let from = previous.status();
        previous.teardown();
        self.preview_tx.send_replace(None);
        info!(session = %self.id, %from, "Session stopped");
    }

    /// Publish a frame to the preview if it belongs to the current stream
    fn show_frame(&self, attempt: u64, frame: &CameraFrame) -> bool {
        let state = self.state.lock().unwrap();
        if !state.owns_stream(attempt) {
            return false;
        }
        self.preview_tx.send_replace(Some(frame.clone()));
        true
    }

    fn count_not_found(&self, attempt: u64) {
        let mut state = self.state.lock().unwrap();
        if state.is_active(attempt) {
            state.stats.not_found += 1;
        }
    }

    /// Apply the cooldown and hand surviving symbols to subscribers
    fn deliver(&self, attempt: u64, device_id: &str, symbols: Vec<DecodedSymbol>) {
        let now = self.clock.now();
        let mut forwarded = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_active(attempt) {
                debug!(session = %self.id, attempt, "Dropping detection from a superseded stream");
                return;
            }
            for symbol in symbols {
                state.stats.detections += 1;
                if state.cooldown.admit(now) {
                    state.stats.forwarded += 1;
                    forwarded.push(DecodeEvent {
                        payload: symbol.payload,
                        device_id: device_id.to_string(),
                        detected_at: chrono::Local::now(),
                        region: symbol.region,
                    });
                } else {
                    state.stats.suppressed += 1;
                    debug!(session = %self.id, payload = %symbol.payload, "Detection suppressed by cooldown");
                }
            }
        }

        for event in &forwarded {
            info!(session = %self.id, device = %event.device_id, payload = %event.payload, "Barcode decoded");
            self.decode_subscribers.emit(event);
        }
    }

    /// Active → Errored after a fatal decoder error
    fn decoder_failed(&self, attempt: u64, message: String) {
        let released = {
            let mut state = self.state.lock().unwrap();
            if !state.is_active(attempt) {
                return;
            }
            let Phase::Active { device, pipeline } = std::mem::replace(&mut state.phase, Phase::Stopped) else {
                return;
            };
            let released = if self.options.release_on_decoder_error {
                state.phase = Phase::Errored {
                    device: Some(device),
                    pipeline: None,
                };
                Some(pipeline)
            } else {
                state.phase = Phase::Errored {
                    device: Some(device),
                    pipeline: Some(pipeline),
                };
                None
            };
            self.publish_status(&state);
            released
        };

        let keep_stream = released.is_none();
        if let Some(pipeline) = released {
            pipeline.release();
            self.preview_tx.send_replace(None);
        }
        info!(session = %self.id, attempt, keep_stream, "Decoder stopped");
        self.report(ScanError::DecoderFatal(message));
    }

    /// The frame channel closed without `stop`
    fn stream_ended(&self, attempt: u64, device_id: &str) {
        let pipeline = {
            let mut state = self.state.lock().unwrap();
            if !state.is_active(attempt) {
                return;
            }
            let Phase::Active { device, pipeline } = std::mem::replace(&mut state.phase, Phase::Stopped) else {
                return;
            };
            state.phase = Phase::Errored {
                device: Some(device),
                pipeline: None,
            };
            self.publish_status(&state);
            pipeline
        };
        pipeline.release();
        self.preview_tx.send_replace(None);
        self.report(ScanError::DeviceUnavailable(format!("{}: stream ended", device_id)));
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            let phase = std::mem::replace(&mut state.phase, Phase::Stopped);
            if !matches!(phase, Phase::Idle | Phase::Stopped) {
                debug!(session = %self.id, "Releasing camera on drop");
            }
            phase.teardown();
        }
    }
}

/// Per-stream task: preview every frame and decode it off the runtime
///
/// Holds only a weak reference so a dropped session tears the stream down.
/// After a fatal decoder error the loop keeps draining frames for the
/// preview without decoding.
async fn decode_loop(session: Weak<SessionInner>, attempt: u64, device_id: String, mut frames: FrameReceiver) {
    let mut decoding = true;

    while let Some(frame) = frames.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        if !inner.show_frame(attempt, &frame) {
            return;
        }
        if !decoding {
            continue;
        }
        let decoder = Arc::clone(&inner.decoder);
        drop(inner);

        let start = std::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || decoder.decode(&frame))
            .await
            .unwrap_or_else(|e| Err(DecodeError::Fatal(format!("decoder task failed: {}", e))));
        trace!(attempt, elapsed_ms = start.elapsed().as_millis() as u64, "Frame decoded");

        let Some(inner) = session.upgrade() else {
            return;
        };
        match result {
            Ok(symbols) if !symbols.is_empty() => inner.deliver(attempt, &device_id, symbols),
            Ok(_) | Err(DecodeError::NotFound) => inner.count_not_found(attempt),
            Err(DecodeError::Fatal(message)) => {
                decoding = false;
                inner.decoder_failed(attempt, message);
            }
        }
    }

    if let Some(inner) = session.upgrade() {
        inner.stream_ended(attempt, &device_id);
    }
}
