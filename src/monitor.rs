/// The control loop: one interruptible 1-second tick that drives the
/// check battery, the utility supervisor, the abort escalation, the
/// lifetime watchdog, and the worker liveness check. Runs until a
/// graceful stop is observed, the lifetime budget runs out, or the abort
/// escalation raises its fatal timeout.
use crate::abort::AbortEscalation;
use crate::checks::CheckBattery;
use crate::config::WardenConfig;
use crate::context::{now_epoch, SessionContext};
use crate::errors::WardenError;
use crate::job::Job;
use crate::procinfo;
use crate::queuedata::{resolve_max_running_time, QueueData};
use crate::schedule::MonitoringTime;
use crate::utilities::UtilitySupervisor;
use crate::validators::JobQueue;
use std::sync::Arc;
use std::time::Duration;

/// Window before the hard lifetime deadline reserved for a clean
/// shutdown instead of an abrupt kill.
pub const GRACE_PERIOD_SECS: u64 = 600;

const TICK: Duration = Duration::from_secs(1);

/// The session has outlived its budget once the time past the grace
/// period exceeds the resolved max running time.
fn lifetime_overrun(elapsed: u64, max_running_time: u64) -> bool {
    elapsed.saturating_sub(GRACE_PERIOD_SECS) > max_running_time
}

pub struct MonitorLoop {
    config: WardenConfig,
    context: Arc<SessionContext>,
    queue: Arc<dyn JobQueue>,
    battery: CheckBattery,
    supervisor: UtilitySupervisor,
    escalation: AbortEscalation,
    queuedata: Option<QueueData>,
    /// Resolved once at loop start; queue data is not re-polled.
    max_running_time: u64,
}

impl MonitorLoop {
    pub fn new(
        config: WardenConfig,
        context: Arc<SessionContext>,
        queue: Arc<dyn JobQueue>,
        battery: CheckBattery,
        supervisor: UtilitySupervisor,
    ) -> Self {
        let queuedata = queue.queuedata();
        let max_running_time =
            resolve_max_running_time(queuedata.as_ref(), config.session.lifetime);
        let escalation = AbortEscalation::new(context.signals.clone());
        Self {
            config,
            context,
            queue,
            battery,
            supervisor,
            escalation,
            queuedata,
            max_running_time,
        }
    }

    /// Drive the monitoring session until shutdown. The returned error is
    /// always a hard fault; per-check failures stay inside the loop.
    pub async fn run(&mut self, job: &mut Job) -> Result<(), WardenError> {
        let mut mt = MonitoringTime::new(&self.config.intervals, self.context.start_epoch);
        let mut tick: u64 = 0;

        loop {
            // interruptible wait: no partial tick runs once a stop is in
            if self
                .context
                .signals
                .graceful_stop
                .wait_timeout(TICK)
                .await
            {
                tracing::info!("graceful stop observed, leaving monitor loop");
                break;
            }
            tick += 1;
            let now = now_epoch();
            let elapsed = now.saturating_sub(self.context.start_epoch);

            if lifetime_overrun(elapsed, self.max_running_time) {
                self.handle_lifetime_overrun(job, elapsed);
                break;
            }

            if tick % 60 == 0 {
                tracing::info!(elapsed_secs = elapsed, "monitor loop heartbeat");
            }

            if self.cpu_sample_due(tick) {
                self.log_cpu_snapshot().await;
            }

            // never interval-gated: the escalation deadlines are its own
            if let Err(e) = self.escalation.step(self.queue.as_ref(), now) {
                tracing::error!(error = %e, "abort escalation failed");
                return Err(e);
            }

            if self.thread_check_due(tick) {
                for name in self.context.dead_workers() {
                    tracing::error!(worker = %name, "worker task is not alive");
                }
            }

            let outcome = self
                .battery
                .run(job, &mut mt, self.queuedata.as_ref(), &self.config, now)
                .await;
            if !outcome.is_ok() {
                tracing::warn!(
                    code = outcome.code,
                    diagnostics = %outcome.diagnostics,
                    "health check reported a failure"
                );
            }

            if !job.utilities.is_empty() {
                self.supervisor.supervise(job);
            }

            self.queue.report_state(job, job.state());
        }

        Ok(())
    }

    /// Lifetime overrun: raise the session-wide indicator once, give the
    /// server a final status flush, then shut down gracefully.
    fn handle_lifetime_overrun(&self, job: &Job, elapsed: u64) {
        tracing::error!(
            elapsed_secs = elapsed,
            max_running_time = self.max_running_time,
            grace_period = GRACE_PERIOD_SECS,
            code = %crate::errors::ErrorCode::ReachedMaxTime,
            "agent has run out of time, shutting down"
        );
        if self.context.set_lifetime_exceeded() {
            // final flush before the rest of the agent reacts to the stop
            self.queue.report_state(job, job.state());
        }
        self.context.signals.graceful_stop.set();
    }

    fn cpu_sample_due(&self, tick: u64) -> bool {
        let interval = self.config.session.cpu_check_interval;
        interval > 0 && tick % interval == 0
    }

    fn thread_check_due(&self, tick: u64) -> bool {
        let interval = self.config.session.thread_check_interval;
        interval > 0 && tick % interval == 0
    }

    /// Diagnostic snapshot of the agent's own process tree.
    async fn log_cpu_snapshot(&self) {
        let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
        let samples = procinfo::list_processes(env!("CARGO_PKG_NAME"), &user).await;
        if samples.is_empty() {
            tracing::warn!("no process samples for cpu snapshot");
            return;
        }
        for sample in samples {
            tracing::info!(
                pid = sample.pid,
                cpu_pct = sample.cpu,
                mem_pct = sample.mem,
                command = %sample.command,
                "cpu consumption snapshot"
            );
        }
    }
}
