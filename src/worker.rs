use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct WorkerState {
    enabled: bool,
    active: bool,
    finished: bool,
}

/// Enable/active/finished handshake between a worker thread and the threads
/// controlling it.
///
/// `enable(false)` returns only once the worker has left its current cycle,
/// so the caller may reconfigure boards without racing the worker.
#[derive(Debug, Default)]
pub struct WorkerControl {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl WorkerControl {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: Mutex::new(WorkerState {
                enabled,
                ..Default::default()
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enables or pauses the worker. Pausing blocks until the worker is idle
    /// or has finished.
    pub fn enable(&self, flag: bool) {
        let mut state = self.lock();
        state.enabled = flag;
        self.changed.notify_all();
        if !flag {
            let _state = self
                .changed
                .wait_while(state, |s| s.active && !s.finished)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Worker side: starts a cycle if enabled. When paused the worker is
    /// marked idle and `false` is returned.
    pub fn begin_cycle(&self) -> bool {
        let mut state = self.lock();
        state.active = state.enabled;
        if !state.active {
            self.changed.notify_all();
        }
        state.active
    }

    /// Worker side: sleeps until enabled or `timeout` expires.
    pub fn wait_enabled(&self, timeout: Duration) {
        let state = self.lock();
        let _state = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.enabled)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Worker side: marks the thread as gone for good.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.active = false;
        state.finished = true;
        self.changed.notify_all();
    }

    /// Waits until the worker reported [`WorkerControl::finish`]. Returns
    /// whether it did within `timeout`.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.finished)
            .unwrap_or_else(|e| e.into_inner());
        state.finished
    }
}
