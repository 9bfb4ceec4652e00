/// Cancellation flags shared between the monitoring core and the rest of
/// the agent. Each flag supports set / clear / is-set plus a timed wait
/// that returns promptly when the flag is raised, so nothing in the loop
/// ever busy-waits or sleeps blindly.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A boolean flag with blocking-wait semantics, cloneable across tasks.
#[derive(Clone)]
pub struct Flag {
    tx: Arc<watch::Sender<bool>>,
}

impl Flag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set or the timeout elapses. Returns the flag
    /// state at return time; wakes immediately on set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let mut rx = self.tx.subscribe();
        let raised = tokio::time::timeout(timeout, rx.wait_for(|set| *set))
            .await
            .map(|changed| changed.is_ok())
            .unwrap_or(false);
        // channel closed or timed out: report current state
        raised || self.is_set()
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

/// The full signal set wired between the monitor and the agent.
///
/// The core only ever reads `abort_job`, sets and reads `graceful_stop`,
/// and reads/clears/force-sets `job_aborted`.
#[derive(Clone, Default)]
pub struct SignalSet {
    /// Cooperative shutdown requested (set by the core on lifetime overrun
    /// and by the abort escalation; also set externally).
    pub graceful_stop: Flag,
    /// External force-abort request for the supervised job.
    pub abort_job: Flag,
    /// Confirmation that the job-side abort completed.
    pub job_aborted: Flag,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_set_clear_is_set() {
        let flag = Flag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_immediately_when_already_set() {
        let flag = Flag::new();
        flag.set();
        let start = Instant::now();
        assert!(flag.wait_timeout(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_timeout_expires_when_never_set() {
        let flag = Flag::new();
        let start = Instant::now();
        assert!(!flag.wait_timeout(Duration::from_millis(50)).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_timeout_wakes_on_set_from_other_task() {
        let flag = Flag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.wait_timeout(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let start = Instant::now();
        flag.set();
        assert!(handle.await.unwrap());
        // woke well before the 5 s deadline
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let flag = Flag::new();
        let other = flag.clone();
        other.set();
        assert!(flag.is_set());
    }
}
