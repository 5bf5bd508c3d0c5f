// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// A cancel handle is passed to a blocking operation such as recording. It's the operation's
/// responsibility to check it between iterations.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<bool>>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Cancel the operation.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
    }
}

/// Represents the state of a playback run as seen by its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Paused,
    Cancelled,
    Finished,
}

/// Coordinates a playback worker with the thread controlling it. The controller pauses,
/// resumes and cancels; the worker sleeps and delivers through the signal so that each of
/// those takes effect immediately, even in the middle of a wait.
#[derive(Clone)]
pub struct PlaybackSignal {
    state: Arc<Mutex<RunState>>,
    condvar: Arc<Condvar>,
}

impl Default for PlaybackSignal {
    fn default() -> Self {
        PlaybackSignal {
            state: Arc::new(Mutex::new(RunState::Running)),
            condvar: Arc::new(Condvar::new()),
        }
    }
}

impl PlaybackSignal {
    /// Creates a new signal in the running state.
    pub fn new() -> PlaybackSignal {
        PlaybackSignal::default()
    }

    pub fn is_paused(&self) -> bool {
        *self.state.lock() == RunState::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.lock() == RunState::Cancelled
    }

    /// Returns true once the worker has exited.
    pub fn is_finished(&self) -> bool {
        *self.state.lock() == RunState::Finished
    }

    /// Suspends the worker. Returns false if it wasn't running.
    pub fn pause(&self) -> bool {
        self.transition(RunState::Running, RunState::Paused)
    }

    /// Resumes a paused worker. Returns false if it wasn't paused.
    pub fn resume(&self) -> bool {
        self.transition(RunState::Paused, RunState::Running)
    }

    /// Cancels the worker unless it has already finished.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state != RunState::Finished {
            *state = RunState::Cancelled;
            self.condvar.notify_all();
        }
    }

    /// Marks the worker as finished. Only the worker should call this.
    pub fn finish(&self) {
        *self.state.lock() = RunState::Finished;
        self.condvar.notify_all();
    }

    /// Blocks until the worker has finished.
    pub fn wait_finished(&self) {
        let mut state = self.state.lock();
        while *state != RunState::Finished {
            self.condvar.wait(&mut state);
        }
    }

    /// Sleeps for the given duration of running time. Time spent paused doesn't count, so a
    /// wait interrupted by a pause continues with its remainder after resuming. Returns false
    /// as soon as the worker is cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        let mut state = self.state.lock();
        loop {
            match *state {
                RunState::Cancelled | RunState::Finished => return false,
                RunState::Paused => self.condvar.wait(&mut state),
                RunState::Running => {
                    if remaining.is_zero() {
                        return true;
                    }
                    let started = Instant::now();
                    if self
                        .condvar
                        .wait_until(&mut state, started + remaining)
                        .timed_out()
                    {
                        remaining = Duration::ZERO;
                    } else {
                        remaining = remaining.saturating_sub(started.elapsed());
                    }
                }
            }
        }
    }

    /// Blocks while paused. Returns false if the worker was cancelled.
    pub fn wait_while_paused(&self) -> bool {
        self.sleep(Duration::ZERO)
    }

    /// Runs the given closure while holding the state, so that a pause or cancel can't slip in
    /// between the check and the closure. Waits out a pause first. Returns None without
    /// running the closure if the worker was cancelled.
    pub fn run_if_active<R, F: FnOnce() -> R>(&self, f: F) -> Option<R> {
        let mut state = self.state.lock();
        loop {
            match *state {
                RunState::Cancelled | RunState::Finished => return None,
                RunState::Paused => self.condvar.wait(&mut state),
                RunState::Running => return Some(f()),
            }
        }
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        self.condvar.notify_all();
        true
    }
}
