// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Process exit status reported after an unrecoverable error.
pub const FATAL_EXIT_STATUS: i32 = -1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ShutdownState {
    quit: bool,
    fatal: bool,
    stopped: bool,
}

/// Shutdown intent and final status for one graph.
///
/// The monitor raises intent (end of stream, fatal error); the application
/// waits on it and then drives the lifecycle controller. Reaching the
/// Stopped state releases [`wait_until_stopped`](Self::wait_until_stopped).
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    state: Mutex<ShutdownState>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_quit(&self) {
        let mut state = self.state.lock();
        if !state.quit {
            state.quit = true;
            self.cond.notify_all();
        }
    }

    /// Record an unrecoverable error; also requests quit.
    pub fn record_fatal(&self) {
        let mut state = self.state.lock();
        state.fatal = true;
        state.quit = true;
        self.cond.notify_all();
    }

    pub(crate) fn mark_stopped(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cond.notify_all();
    }

    pub fn quit_requested(&self) -> bool {
        self.state.lock().quit
    }

    pub fn is_fatal(&self) -> bool {
        self.state.lock().fatal
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// 0 on clean shutdown, [`FATAL_EXIT_STATUS`] after any fatal error.
    pub fn exit_status(&self) -> i32 {
        if self.is_fatal() { FATAL_EXIT_STATUS } else { 0 }
    }

    /// Block until quit is requested or `timeout` passes. Returns whether
    /// quit was requested.
    pub fn wait_for_quit(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.quit)
    }

    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.stopped)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&ShutdownState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !done(&state) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return done(&state);
            }
        }
        true
    }
}
