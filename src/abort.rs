/// Abort escalation: turns the external `abort_job` signal into a bounded
/// wait-then-escalate-then-fatal sequence. The control loop steps this
/// machine once per tick with the current time; all deadlines are epoch
/// seconds, so the whole protocol is testable without sleeping.
use crate::errors::WardenError;
use crate::signals::SignalSet;
use crate::validators::JobQueue;

/// How long to wait for the job side to confirm the abort.
pub const JOB_ABORT_WAIT_SECS: u64 = 120;
/// Extra confirmation window after forcing a graceful stop.
pub const CONFIRMATION_WAIT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    /// No abort in progress.
    Idle,
    /// Abort requested; waiting up to 120 s for `job_aborted`.
    WaitingForJobAbort { deadline: u64 },
    /// Graceful stop forced; final 10 s window for `job_aborted`.
    WaitingForConfirmation { deadline: u64 },
}

pub struct AbortEscalation {
    state: EscalationState,
    signals: SignalSet,
    /// When the abort request was first observed, for fault diagnostics.
    requested_at: Option<u64>,
}

impl AbortEscalation {
    pub fn new(signals: SignalSet) -> Self {
        Self {
            state: EscalationState::Idle,
            signals,
            requested_at: None,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    /// Advance the machine one step. Returns the fatal escalation timeout
    /// when both deadlines pass without a job-side confirmation; this is
    /// the only hard fault the monitoring core ever raises.
    pub fn step(&mut self, queue: &dyn JobQueue, now: u64) -> Result<(), WardenError> {
        match self.state {
            EscalationState::Idle => {
                if self.signals.abort_job.is_set() {
                    tracing::warn!("abort_job signal observed, aborting queued/running jobs");
                    queue.abort_all("SIGTERM");
                    self.requested_at = Some(now);
                    self.state = EscalationState::WaitingForJobAbort {
                        deadline: now + JOB_ABORT_WAIT_SECS,
                    };
                }
            }
            EscalationState::WaitingForJobAbort { deadline } => {
                if self.signals.job_aborted.is_set() {
                    tracing::info!("job abort confirmed");
                    self.finish_clean();
                } else if now >= deadline {
                    tracing::warn!(
                        waited_secs = JOB_ABORT_WAIT_SECS,
                        "job abort not confirmed in time, requesting graceful stop"
                    );
                    if !self.signals.graceful_stop.is_set() {
                        self.signals.graceful_stop.set();
                    }
                    self.state = EscalationState::WaitingForConfirmation {
                        deadline: now + CONFIRMATION_WAIT_SECS,
                    };
                }
            }
            EscalationState::WaitingForConfirmation { deadline } => {
                if self.signals.job_aborted.is_set() {
                    tracing::info!("job abort confirmed after graceful stop request");
                    self.finish_clean();
                } else if now >= deadline {
                    let waited_secs = now.saturating_sub(self.requested_at.unwrap_or(now));
                    tracing::error!(
                        waited_secs,
                        "job abort never confirmed, treating job as aborted"
                    );
                    // treat the job as aborted regardless, so teardown
                    // elsewhere does not wait on it forever
                    self.signals.abort_job.clear();
                    self.signals.job_aborted.set();
                    self.state = EscalationState::Idle;
                    self.requested_at = None;
                    return Err(WardenError::AbortEscalationTimeout { waited_secs });
                }
            }
        }
        Ok(())
    }

    fn finish_clean(&mut self) {
        self.signals.abort_job.clear();
        self.state = EscalationState::Idle;
        self.requested_at = None;
    }
}
