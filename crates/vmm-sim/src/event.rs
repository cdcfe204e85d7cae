//! Concrete, `Condvar`-backed implementation of `vmm_core::event`'s trait
//! boundary — the host event primitives §1 names as an external
//! collaborator, same split as [`crate::frame_mapper::SimFrameMapper`] draws
//! for frame allocation.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use vmm_core::event::{EventSet, VmEvent};

/// Whether a wait clears the event's signaled state automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Manual,
    Auto,
}

/// One named event. `Manual` matches `initiate_trimming`/`initiate_writing`/
/// `initiate_pruning`/`standby_pages_ready`/`system_exit` (stays signaled
/// until something explicitly resets it); `Auto` is unused by the six named
/// events of §5 but kept general since the original's event primitives
/// support both.
pub struct Event {
    mode: ResetMode,
    state: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            mode,
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }
}

impl VmEvent for Event {
    fn set(&self) {
        *self.state.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.state.lock().unwrap() = false;
    }

    fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    fn wait(&self) {
        let mut signaled = self.state.lock().unwrap();
        while !*signaled {
            signaled = self.cv.wait(signaled).unwrap();
        }
        if self.mode == ResetMode::Auto {
            *signaled = false;
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.lock().unwrap();
        loop {
            if *signaled {
                if self.mode == ResetMode::Auto {
                    *signaled = false;
                }
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(signaled, deadline - now).unwrap();
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
    }
}

/// The six named events of §5, all manual-reset.
pub struct Events {
    system_start: Event,
    initiate_trimming: Event,
    initiate_writing: Event,
    initiate_pruning: Event,
    standby_pages_ready: Event,
    system_exit: Event,
}

impl Events {
    pub fn new() -> Self {
        Self {
            system_start: Event::new(ResetMode::Manual),
            initiate_trimming: Event::new(ResetMode::Manual),
            initiate_writing: Event::new(ResetMode::Manual),
            initiate_pruning: Event::new(ResetMode::Manual),
            standby_pages_ready: Event::new(ResetMode::Manual),
            system_exit: Event::new(ResetMode::Manual),
        }
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSet for Events {
    fn system_start(&self) -> &dyn VmEvent {
        &self.system_start
    }
    fn initiate_trimming(&self) -> &dyn VmEvent {
        &self.initiate_trimming
    }
    fn initiate_writing(&self) -> &dyn VmEvent {
        &self.initiate_writing
    }
    fn initiate_pruning(&self) -> &dyn VmEvent {
        &self.initiate_pruning
    }
    fn standby_pages_ready(&self) -> &dyn VmEvent {
        &self.standby_pages_ready
    }
    fn system_exit(&self) -> &dyn VmEvent {
        &self.system_exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_reset_stays_signaled_for_all_waiters() {
        let event = Event::new(ResetMode::Manual);
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(event.is_set());
    }

    #[test]
    fn auto_reset_clears_after_single_wait() {
        let event = Event::new(ResetMode::Auto);
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(!event.is_set());
    }

    #[test]
    fn wait_timeout_returns_false_when_never_signaled() {
        let event = Event::new(ResetMode::Manual);
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }
}
