// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle tests against in-memory capabilities

use super::*;
use crate::backends::camera::BackendError;
use crate::backends::camera::mock::{CaptureEvent, MockCapture, MockEnumerator, OpenBehavior, text_frame};
use futures::StreamExt;
use std::time::Instant;

/// Clock advanced by hand
struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
        })
    }

    fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// Reads the frame bytes as the payload
///
/// Empty (zero) frames are "nothing found"; a `fatal:` prefix is a decoder
/// failure carrying the rest of the text.
struct TextDecoder;

impl BarcodeDecoder for TextDecoder {
    fn decode(&self, frame: &CameraFrame) -> Result<Vec<DecodedSymbol>, DecodeError> {
        let text = String::from_utf8_lossy(&frame.data);
        let text = text.trim_matches('\0');
        if text.is_empty() {
            return Err(DecodeError::NotFound);
        }
        if let Some(reason) = text.strip_prefix("fatal:") {
            return Err(DecodeError::Fatal(reason.to_string()));
        }
        Ok(vec![DecodedSymbol::new(text)])
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

struct Harness {
    session: ScanSession,
    enumerator: Arc<MockEnumerator>,
    capture: Arc<MockCapture>,
    clock: Arc<ManualClock>,
    decoded: Arc<Mutex<Vec<DecodeEvent>>>,
    errors: Arc<Mutex<Vec<ScanError>>>,
    _subscriptions: Vec<Subscription>,
}

impl Harness {
    fn new(devices: &[&str]) -> Self {
        Self::with_options(devices, test_options())
    }

    fn with_options(devices: &[&str], options: SessionOptions) -> Self {
        let enumerator = MockEnumerator::with_devices(devices);
        Self::with_enumerator(enumerator, options)
    }

    fn with_enumerator(enumerator: Arc<MockEnumerator>, options: SessionOptions) -> Self {
        let capture = MockCapture::new();
        let clock = ManualClock::new();
        let session = ScanSession::new_with_clock(
            enumerator.clone(),
            capture.clone(),
            Arc::new(TextDecoder),
            options,
            clock.clone(),
        );

        let decoded = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&decoded);
        let e = Arc::clone(&errors);
        let subscriptions = vec![
            session.on_decode(move |event| d.lock().unwrap().push(event.clone())),
            session.on_error(move |error| e.lock().unwrap().push(error.clone())),
        ];

        Self {
            session,
            enumerator,
            capture,
            clock,
            decoded,
            errors,
            _subscriptions: subscriptions,
        }
    }

    fn payloads(&self) -> Vec<String> {
        self.decoded.lock().unwrap().iter().map(|e| e.payload.clone()).collect()
    }

    fn errors(&self) -> Vec<ScanError> {
        self.errors.lock().unwrap().clone()
    }

    async fn feed(&self, device_id: &str, text: &str) {
        let sender = self.capture.frame_sender(device_id).expect("stream open");
        sender.send(text_frame(text)).await.expect("decode loop alive");
    }

    /// Feed a frame and wait until the session has processed it
    async fn feed_and_settle(&self, device_id: &str, text: &str) {
        let before = self.processed();
        self.feed(device_id, text).await;
        wait_until(|| self.processed() > before).await;
    }

    fn processed(&self) -> u64 {
        let stats = self.session.snapshot().stats;
        stats.detections + stats.not_found
    }
}

fn test_options() -> SessionOptions {
    SessionOptions {
        cooldown: Duration::from_millis(1000),
        ..SessionOptions::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_start_selects_first_device() {
    let h = Harness::new(&["cam1", "cam2"]);

    let outcome = h.session.start(None).await.unwrap();

    assert_eq!(outcome, StartOutcome::Active(VideoDevice::new("cam1", "Mock cam1")));
    assert_eq!(h.session.status(), SessionStatus::Active);
    assert_eq!(h.session.active_device().map(|d| d.id), Some("cam1".to_string()));
    assert_eq!(
        h.capture.events(),
        vec![
            CaptureEvent::Requested("cam1".into()),
            CaptureEvent::Opened("cam1".into())
        ]
    );
    assert_eq!(h.enumerator.calls(), 1);
}

#[tokio::test]
async fn test_start_with_explicit_device() {
    let h = Harness::new(&["cam1", "cam2"]);

    h.session.start(Some("cam2")).await.unwrap();

    assert_eq!(h.session.active_device().map(|d| d.id), Some("cam2".to_string()));
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = Harness::new(&["cam1"]);
    let mut status = h.session.watch_status();

    h.session.stop();
    assert_eq!(h.session.status(), SessionStatus::Stopped);

    h.session.start(None).await.unwrap();
    h.session.stop();
    h.session.stop();

    assert_eq!(h.session.status(), SessionStatus::Stopped);
    assert_eq!(*status.borrow_and_update(), SessionStatus::Stopped);
    assert_eq!(h.capture.live_streams(), 0);
    let stops = h
        .capture
        .events()
        .into_iter()
        .filter(|e| matches!(e, CaptureEvent::Stopped(_)))
        .count();
    assert_eq!(stops, 1);
    assert!(h.session.preview().borrow().is_none());
}

#[tokio::test]
async fn test_permission_denied_then_restart() {
    let h = Harness::new(&["cam1"]);
    h.capture
        .push_behavior(OpenBehavior::Fail(BackendError::PermissionDenied("cam1".into())));

    let err = h.session.start(None).await.unwrap_err();

    assert_eq!(err, ScanError::PermissionDenied("cam1".into()));
    assert_eq!(h.session.status(), SessionStatus::Errored);
    assert_eq!(h.errors(), vec![err.clone()]);
    assert_eq!(h.session.snapshot().last_error, Some(err));
    assert_eq!(h.capture.live_streams(), 0);

    // Errored is restartable
    h.session.start(None).await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_enumeration_failure() {
    let enumerator = MockEnumerator::failing(BackendError::NotAvailable("no video4linux".into()));
    let h = Harness::with_enumerator(enumerator, test_options());

    let listed = h.session.list_devices().await;
    assert!(matches!(listed, Err(ScanError::DeviceEnumeration(_))));

    let err = h.session.start(None).await.unwrap_err();
    assert!(matches!(err, ScanError::DeviceEnumeration(_)));
    assert_eq!(h.session.status(), SessionStatus::Errored);
    assert!(h.capture.events().is_empty());
}

#[tokio::test]
async fn test_no_devices_is_device_not_found() {
    let h = Harness::new(&[]);

    let err = h.session.start(Some("cam9")).await.unwrap_err();

    assert_eq!(err, ScanError::DeviceNotFound("cam9".into()));
    assert_eq!(h.session.status(), SessionStatus::Errored);
}

#[tokio::test]
async fn test_missing_device_falls_back_with_notice() {
    let h = Harness::new(&["cam1", "cam2"]);

    let outcome = h.session.start(Some("cam9")).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Active(ref d) if d.id == "cam1"));
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], ScanError::DeviceNotFound(msg) if msg.contains("cam9")));
}

#[tokio::test]
async fn test_device_list_is_requeried() {
    let h = Harness::new(&["cam1"]);
    assert_eq!(h.session.list_devices().await.unwrap().len(), 1);

    h.enumerator.set_devices(&["cam1", "cam2"]);
    assert_eq!(h.session.list_devices().await.unwrap().len(), 2);
    assert_eq!(h.enumerator.calls(), 2);
}

#[tokio::test]
async fn test_switch_releases_old_stream_before_opening_new() {
    let h = Harness::new(&["cam1", "cam2"]);
    h.session.start(Some("cam1")).await.unwrap();

    let outcome = h.session.switch_device("cam2").await.unwrap();

    assert!(matches!(outcome, StartOutcome::Active(ref d) if d.id == "cam2"));
    assert_eq!(
        h.capture.events(),
        vec![
            CaptureEvent::Requested("cam1".into()),
            CaptureEvent::Opened("cam1".into()),
            CaptureEvent::Stopped("cam1".into()),
            CaptureEvent::Requested("cam2".into()),
            CaptureEvent::Opened("cam2".into()),
        ]
    );
    assert_eq!(h.capture.max_live_streams(), 1);
    assert_eq!(h.capture.live_streams(), 1);
}

#[tokio::test]
async fn test_switch_stops_old_stream_off_the_runtime_thread() {
    let h = Harness::new(&["cam1", "cam2"]);
    h.session.start(Some("cam1")).await.unwrap();

    h.session.switch_device("cam2").await.unwrap();

    let stopped_on = h.capture.stopped_on("cam1").expect("cam1 stopped");
    assert_ne!(stopped_on, std::thread::current().id());
}

#[tokio::test]
async fn test_restart_stops_kept_stream_off_the_runtime_thread() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();
    h.feed("cam1", "fatal:boom").await;
    wait_until(|| h.session.status() == SessionStatus::Errored).await;

    h.session.start(None).await.unwrap();

    let stopped_on = h.capture.stopped_on("cam1").expect("kept stream stopped");
    assert_ne!(stopped_on, std::thread::current().id());
}

#[tokio::test]
async fn test_switch_while_requesting_cancels_pending_start() {
    let h = Harness::new(&["cam1", "cam2"]);
    let gate = h.capture.gate();

    let pending = tokio::spawn({
        let session = h.session.clone();
        async move { session.start(Some("cam1")).await }
    });
    wait_until(|| h.capture.events().contains(&CaptureEvent::Requested("cam1".into()))).await;

    let switched = h.session.switch_device("cam2").await.unwrap();
    let _ = gate.send(Ok(()));

    assert_eq!(pending.await.unwrap(), Ok(StartOutcome::Cancelled));
    assert!(matches!(switched, StartOutcome::Active(ref d) if d.id == "cam2"));
    assert!(!h.capture.events().contains(&CaptureEvent::Opened("cam1".into())));
    assert_eq!(h.capture.max_live_streams(), 1);
}

#[tokio::test]
async fn test_invalid_state_transitions() {
    let h = Harness::new(&["cam1"]);

    let err = h.session.switch_device("cam1").await.unwrap_err();
    assert_eq!(
        err,
        ScanError::InvalidState {
            operation: "switch device",
            status: SessionStatus::Idle
        }
    );

    h.session.start(None).await.unwrap();
    let err = h.session.start(None).await.unwrap_err();
    assert_eq!(
        err,
        ScanError::InvalidState {
            operation: "start",
            status: SessionStatus::Active
        }
    );
    // The running stream is untouched
    assert_eq!(h.session.status(), SessionStatus::Active);
    assert_eq!(h.capture.live_streams(), 1);

    h.session.stop();
    let err = h.session.switch_device("cam1").await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidState { status: SessionStatus::Stopped, .. }));
    assert_eq!(h.errors().len(), 3);
}

#[tokio::test]
async fn test_late_grant_after_stop_is_released() {
    let h = Harness::new(&["cam1"]);
    let gate = h.capture.gate();

    let pending = tokio::spawn({
        let session = h.session.clone();
        async move { session.start(None).await }
    });
    wait_until(|| h.session.status() == SessionStatus::Requesting).await;
    wait_until(|| h.capture.events().contains(&CaptureEvent::Requested("cam1".into()))).await;

    h.session.stop();
    let _ = gate.send(Ok(()));

    assert_eq!(pending.await.unwrap(), Ok(StartOutcome::Cancelled));
    assert_eq!(h.session.status(), SessionStatus::Stopped);
    assert_eq!(h.capture.live_streams(), 0);
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_interrupted_start_stops_pending_request() {
    let h = Harness::new(&["cam1"]);
    let _gate = h.capture.gate();
    let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

    let pending = tokio::spawn({
        let session = h.session.clone();
        async move {
            session
                .start_until(None, async {
                    let _ = interrupt_rx.await;
                })
                .await
        }
    });
    wait_until(|| h.capture.events().contains(&CaptureEvent::Requested("cam1".into()))).await;

    interrupt_tx.send(()).unwrap();

    assert_eq!(pending.await.unwrap(), Ok(StartOutcome::Cancelled));
    assert_eq!(h.session.status(), SessionStatus::Stopped);
    assert_eq!(h.capture.live_streams(), 0);
    assert!(!h.capture.events().contains(&CaptureEvent::Opened("cam1".into())));
}

#[tokio::test]
async fn test_grant_racing_cancellation_is_stopped() {
    let h = Harness::new(&["cam1"]);
    let mut stream = h
        .capture
        .open(MediaConstraints {
            device_id: Some("cam1".into()),
            width: 640,
            height: 480,
            facing: FacingMode::Environment,
        })
        .await
        .unwrap();
    let frames = stream.take_frames().unwrap();
    assert_eq!(h.capture.live_streams(), 1);

    // No attempt is pending, so any grant is stale
    let outcome = h
        .session
        .inner
        .activate(7, VideoDevice::new("cam1", "Mock cam1"), stream, frames);

    assert_eq!(outcome, StartOutcome::Cancelled);
    assert_eq!(h.capture.live_streams(), 0);
    assert_eq!(h.session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_cooldown_suppresses_duplicates() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();

    h.feed_and_settle("cam1", "ABC123").await;
    h.clock.advance(Duration::from_millis(500));
    h.feed_and_settle("cam1", "ABC123").await;

    assert_eq!(h.payloads(), vec!["ABC123"]);
    let snapshot = h.session.snapshot();
    assert!(snapshot.cooldown_active);
    assert_eq!(snapshot.stats.suppressed, 1);

    h.clock.advance(Duration::from_millis(500));
    h.feed_and_settle("cam1", "ABC123").await;

    assert_eq!(h.payloads(), vec!["ABC123", "ABC123"]);
    let events = h.decoded.lock().unwrap();
    assert_eq!(events[0].device_id, "cam1");
}

#[tokio::test]
async fn test_cooldown_applies_to_any_payload() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();

    h.feed_and_settle("cam1", "FIRST").await;
    h.clock.advance(Duration::from_millis(10));
    h.feed_and_settle("cam1", "SECOND").await;

    assert_eq!(h.payloads(), vec!["FIRST"]);
}

#[tokio::test]
async fn test_cooldown_survives_device_switch() {
    let h = Harness::new(&["cam1", "cam2"]);
    h.session.start(Some("cam1")).await.unwrap();
    h.feed_and_settle("cam1", "ABC123").await;

    h.session.switch_device("cam2").await.unwrap();
    h.clock.advance(Duration::from_millis(500));
    h.feed_and_settle("cam2", "ABC123").await;

    assert_eq!(h.payloads(), vec!["ABC123"]);
    assert_eq!(h.session.snapshot().stats.suppressed, 1);
}

#[tokio::test]
async fn test_cooldown_survives_restart() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();
    h.feed_and_settle("cam1", "ABC123").await;

    h.session.stop();
    h.session.start(None).await.unwrap();
    h.clock.advance(Duration::from_millis(500));
    h.feed_and_settle("cam1", "ABC123").await;
    assert_eq!(h.payloads(), vec!["ABC123"]);

    h.clock.advance(Duration::from_millis(500));
    h.feed_and_settle("cam1", "ABC123").await;
    assert_eq!(h.payloads(), vec!["ABC123", "ABC123"]);
}

#[tokio::test]
async fn test_detection_from_superseded_attempt_is_dropped() {
    let h = Harness::new(&["cam1", "cam2"]);
    h.session.start(Some("cam1")).await.unwrap();
    let first_attempt = h.session.inner.state.lock().unwrap().attempt;
    h.session.switch_device("cam2").await.unwrap();

    h.session
        .inner
        .deliver(first_attempt, "cam1", vec![DecodedSymbol::new("LATE")]);
    h.feed_and_settle("cam2", "FRESH").await;

    assert_eq!(h.payloads(), vec!["FRESH"]);
}

#[tokio::test]
async fn test_detection_after_stop_is_dropped() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();
    let attempt = h.session.inner.state.lock().unwrap().attempt;
    h.session.stop();

    h.session
        .inner
        .deliver(attempt, "cam1", vec![DecodedSymbol::new("LATE")]);

    assert!(h.payloads().is_empty());
    assert_eq!(h.session.snapshot().stats.detections, 0);
}

#[tokio::test]
async fn test_not_found_frames_are_never_surfaced() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();

    h.feed_and_settle("cam1", "").await;
    h.feed_and_settle("cam1", "").await;

    assert_eq!(h.session.snapshot().stats.not_found, 2);
    assert!(h.payloads().is_empty());
    assert!(h.errors().is_empty());
    assert_eq!(h.session.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_decoder_fatal_keeps_stream_until_stop() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();

    h.feed("cam1", "fatal:model missing").await;
    wait_until(|| h.session.status() == SessionStatus::Errored).await;

    assert_eq!(h.errors(), vec![ScanError::DecoderFatal("model missing".into())]);
    assert_eq!(h.capture.live_streams(), 1);
    assert_eq!(h.session.active_device().map(|d| d.id), Some("cam1".to_string()));

    // Preview keeps running, decoding does not
    let preview = h.session.preview();
    h.feed("cam1", "AFTER").await;
    wait_until(|| {
        preview
            .borrow()
            .as_ref()
            .is_some_and(|f| f.data.as_ref() == b"AFTER")
    })
    .await;
    assert!(h.payloads().is_empty());

    h.session.stop();
    assert_eq!(h.capture.live_streams(), 0);
}

#[tokio::test]
async fn test_decoder_fatal_can_release_stream() {
    let options = SessionOptions {
        release_on_decoder_error: true,
        ..test_options()
    };
    let h = Harness::with_options(&["cam1"], options);
    h.session.start(None).await.unwrap();

    h.feed("cam1", "fatal:boom").await;
    wait_until(|| h.session.status() == SessionStatus::Errored).await;
    wait_until(|| h.capture.live_streams() == 0).await;

    assert!(h.capture.events().contains(&CaptureEvent::Stopped("cam1".into())));

    // Restart from Errored opens a fresh stream
    h.session.start(None).await.unwrap();
    assert_eq!(h.capture.live_streams(), 1);
}

#[tokio::test]
async fn test_restart_after_decoder_fatal_releases_kept_stream() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();
    h.feed("cam1", "fatal:boom").await;
    wait_until(|| h.session.status() == SessionStatus::Errored).await;

    h.session.start(None).await.unwrap();

    assert_eq!(h.capture.live_streams(), 1);
    assert_eq!(h.capture.max_live_streams(), 1);
}

#[tokio::test]
async fn test_stream_end_moves_to_errored() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();

    h.capture.end_stream("cam1");
    wait_until(|| h.session.status() == SessionStatus::Errored).await;

    assert!(matches!(&h.errors()[..], [ScanError::DeviceUnavailable(_)]));
    assert_eq!(h.capture.live_streams(), 0);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let h = Harness::new(&["cam1"]);
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    let subscription = h.session.on_decode(move |_| *counter.lock().unwrap() += 1);
    h.session.start(None).await.unwrap();

    h.feed_and_settle("cam1", "ONE").await;
    subscription.unsubscribe();
    h.clock.advance(Duration::from_secs(2));
    h.feed_and_settle("cam1", "TWO").await;

    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(h.payloads(), vec!["ONE", "TWO"]);
}

#[tokio::test]
async fn test_decode_stream_yields_forwarded_events() {
    let h = Harness::new(&["cam1"]);
    let mut stream = Box::pin(h.session.decode_stream());
    h.session.start(None).await.unwrap();

    h.feed("cam1", "STREAMED").await;
    let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("event in time")
        .expect("stream open");

    assert_eq!(event.payload, "STREAMED");
}

#[tokio::test]
async fn test_dropping_session_releases_camera() {
    let h = Harness::new(&["cam1"]);
    h.session.start(None).await.unwrap();
    let capture = Arc::clone(&h.capture);

    drop(h);

    assert_eq!(capture.live_streams(), 0);
}
