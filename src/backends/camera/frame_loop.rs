// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! A capture loop owns the device on its own OS thread so that blocking
//! dequeue calls never run on the async runtime. The controller hands the
//! opener a readiness receiver: the device is only reported open once the
//! thread's initialization has succeeded, and open errors travel back the
//! same way.

use super::types::{BackendError, BackendResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// Dropping the controller stops the loop and joins the thread, which is
/// what releases the underlying device handle.
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a capture loop whose state is created on the capture thread
    ///
    /// `init_fn` runs once on the new thread. Its outcome is sent through the
    /// returned receiver; on failure the thread exits without running
    /// `loop_fn`. The state never leaves the capture thread, so it does not
    /// need to be `Send`.
    pub fn start_with_init<S, I, F>(
        name: &str,
        init_fn: I,
        mut loop_fn: F,
    ) -> (Self, oneshot::Receiver<BackendResult<()>>)
    where
        I: FnOnce() -> BackendResult<S> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(state) => {
                        debug!(name = %name_clone, "Capture loop initialized");
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Capture loop initialization failed");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !stop_signal_clone.load(Ordering::SeqCst) {
                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }

                // state (and with it the device) is dropped here, on the capture thread
                drop(state);
                info!(name = %name_clone, "Capture loop thread exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The closure (and ready_tx with it) was dropped, so the
                // receiver reports a closed channel; log the reason here.
                warn!(name = %name, error = %e, "Failed to spawn capture thread");
                None
            }
        };

        (
            Self {
                thread_handle,
                stop_signal,
                name: name.to_string(),
            },
            ready_rx,
        )
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Stop the loop without waiting on the caller's thread
    ///
    /// Inside a tokio runtime the join moves to the blocking pool; elsewhere
    /// it happens inline.
    pub fn stop_detached(self) {
        self.request_stop();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(self));
            }
            Err(_) => drop(self),
        }
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

/// Map a closed readiness channel (thread died before reporting) to an error
pub fn readiness_lost(name: &str) -> BackendError {
    BackendError::Other(format!("capture thread {} exited before reporting", name))
}
