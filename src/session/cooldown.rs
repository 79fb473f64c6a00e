// SPDX-License-Identifier: GPL-3.0-only

//! Post-detection cooldown
//!
//! After a symbol is forwarded, every detection (of any payload) is dropped
//! until the window has elapsed. Time comes from a [`Clock`] so tests can
//! drive it by hand.

use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    suppress_until: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            suppress_until: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a detection at `now` is forwarded
    ///
    /// A forwarded detection opens a new window. A detection exactly at the
    /// end of the window is forwarded.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(until) = self.suppress_until
            && now < until
        {
            return false;
        }
        self.suppress_until = Some(now + self.window);
        true
    }

    /// Forget any running window
    pub fn reset(&mut self) {
        self.suppress_until = None;
    }

    pub fn suppress_until(&self) -> Option<Instant> {
        self.suppress_until
    }

    pub fn is_suppressing(&self, now: Instant) -> bool {
        self.suppress_until.is_some_and(|until| now < until)
    }
}
