/// Shared session context for one monitoring session: the signal set, the
/// session clock, the once-only "lifetime exceeded" indicator, and the
/// registry of worker tasks watched by the dead-thread check. This object
/// replaces any ambient global state; everything that needs one of these
/// facts gets handed the context.
use crate::signals::SignalSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Current wall-clock time as epoch seconds.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct SessionContext {
    pub signals: SignalSet,
    /// Epoch seconds when the session (and its lifetime budget) started.
    pub start_epoch: u64,
    /// Set exactly once when the lifetime limit is hit, never cleared.
    lifetime_exceeded: AtomicBool,
    workers: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl SessionContext {
    pub fn new(signals: SignalSet, start_epoch: u64) -> Self {
        Self {
            signals,
            start_epoch,
            lifetime_exceeded: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Raise the lifetime-exceeded indicator. Returns true the first time,
    /// false if it was already set.
    pub fn set_lifetime_exceeded(&self) -> bool {
        !self.lifetime_exceeded.swap(true, Ordering::SeqCst)
    }

    pub fn lifetime_exceeded(&self) -> bool {
        self.lifetime_exceeded.load(Ordering::SeqCst)
    }

    /// Register a worker task for the periodic liveness check.
    pub fn register_worker(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.push((name.into(), handle));
        }
    }

    /// Names of registered workers that have terminated.
    pub fn dead_workers(&self) -> Vec<String> {
        match self.workers.lock() {
            Ok(workers) => workers
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(name, _)| name.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
