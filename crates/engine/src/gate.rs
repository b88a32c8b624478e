//! Single-flight run gate.
//!
//! At most one canary run may be active. [`RunGate::try_acquire`] never
//! blocks: a trigger that arrives while a run is in progress is rejected, not
//! queued. The returned [`RunPermit`] clears the flag when dropped, so the gate
//! is released on every exit path of the run, including a panic.

use std::sync::{Arc, Mutex};

/// Shared busy flag. Cloning yields another handle to the same gate.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    running: Arc<Mutex<bool>>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate. Returns `None` if a run is already active.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        // the lock is only held for the flag read/write
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *running {
            return None;
        }
        *running = true;
        Some(RunPermit {
            running: Arc::clone(&self.running),
        })
    }

    /// Whether a run currently holds the gate.
    pub fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Proof of an active run. Releases the gate exactly once on drop.
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<Mutex<bool>>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *running = false;
    }
}
