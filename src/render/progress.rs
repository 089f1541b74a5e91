use std::sync::{Arc, Mutex};
use std::sync::atomic;
use std::sync::atomic::AtomicBool;

/// Receives coarse progress reports during synchronization and is polled for cancellation.
pub trait Progress: Sync {
    fn get_cancel(&self) -> bool;
    fn set_status(&self, status: &str, substatus: &str);
    /// Reports `done` of `total` units of the current stage.
    fn set_progress(&self, done: usize, total: usize);
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressState {
    pub status: String,
    pub substatus: String,
    pub done: usize,
    pub total: usize,
}

/// Thread-safe progress with a shared cancel flag. Clones observe the same state.
#[derive(Clone, Default)]
pub struct SimpleProgress {
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<ProgressState>>,
}

impl SimpleProgress {
    pub fn new() -> SimpleProgress {
        SimpleProgress::default()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, atomic::Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.cancel.store(false, atomic::Ordering::Relaxed);
    }

    pub fn state(&self) -> ProgressState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone()
        }
    }
}

impl Progress for SimpleProgress {
    fn get_cancel(&self) -> bool {
        self.cancel.load(atomic::Ordering::Relaxed)
    }

    fn set_status(&self, status: &str, substatus: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.status = status.to_string();
            state.substatus = substatus.to_string();
        }
    }

    fn set_progress(&self, done: usize, total: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.done = done;
            state.total = total;
        }
    }
}
