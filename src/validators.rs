/// External collaborator seams: site-specific validators, loop detection,
/// and the job/queue side of the agent. Implementations are registered in
/// a table keyed by the configured user profile and resolved once at
/// session start; the checks receive plain trait objects.
use crate::errors::CheckOutcome;
use crate::job::{Job, JobState};
use crate::queuedata::QueueData;
use crate::schedule::MonitoringTime;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Site- or experiment-specific verification logic.
pub trait SiteValidator: Send + Sync {
    /// Whether the memory check applies at this site at all.
    fn memory_check_enabled(&self) -> bool;
    /// Verify the payload's memory usage against site limits.
    fn check_memory(&self, job: &Job) -> CheckOutcome;
    /// Verify the user credential (proxy) is still valid.
    fn check_proxy(&self) -> CheckOutcome;
}

/// Forward-progress heuristic for the payload. May fail with a plain
/// error message; the check battery absorbs those, it never sees a panic.
pub trait LoopDetector: Send + Sync {
    fn detect_loop(&self, job: &Job, mt: &MonitoringTime) -> Result<CheckOutcome, String>;
}

/// The job/queue side of the agent: queue configuration, abort fan-out,
/// and the per-tick heartbeat.
pub trait JobQueue: Send + Sync {
    fn queuedata(&self) -> Option<QueueData>;
    /// Abort all queued/running jobs, passing the triggering signal name.
    fn abort_all(&self, signal: &str);
    /// Report the job's current state upstream (the heartbeat).
    fn report_state(&self, job: &Job, state: JobState);
}

/// Registered site-validator implementations, keyed by user profile.
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn SiteValidator>>,
}

impl ValidatorRegistry {
    /// Registry with the built-in generic profile.
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            validators: HashMap::new(),
        };
        registry.register("generic", Arc::new(GenericValidator));
        registry
    }

    pub fn register(&mut self, profile: &str, validator: Arc<dyn SiteValidator>) {
        self.validators.insert(profile.to_string(), validator);
    }

    /// Resolve the validator for a profile; unknown profiles fall back to
    /// the generic one with a warning.
    pub fn resolve(&self, profile: &str) -> Arc<dyn SiteValidator> {
        if let Some(validator) = self.validators.get(profile) {
            return Arc::clone(validator);
        }
        tracing::warn!(profile, "no site validator registered for profile, using generic");
        Arc::new(GenericValidator)
    }
}

/// The generic profile: no site memory limits, credentials assumed valid.
pub struct GenericValidator;

impl SiteValidator for GenericValidator {
    fn memory_check_enabled(&self) -> bool {
        false
    }

    fn check_memory(&self, _job: &Job) -> CheckOutcome {
        CheckOutcome::ok()
    }

    fn check_proxy(&self) -> CheckOutcome {
        CheckOutcome::ok()
    }
}

/// Loop detector that never flags anything; sites plug in their own.
pub struct NoopLoopDetector;

impl LoopDetector for NoopLoopDetector {
    fn detect_loop(&self, _job: &Job, _mt: &MonitoringTime) -> Result<CheckOutcome, String> {
        Ok(CheckOutcome::ok())
    }
}

/// Job-queue collaborator that logs instead of talking to a real server.
/// Used when the agent runs standalone; the full agent injects its own.
pub struct LoggingJobQueue {
    queuedata: Option<QueueData>,
}

impl LoggingJobQueue {
    pub fn new(queuedata: Option<QueueData>) -> Self {
        Self { queuedata }
    }
}

impl JobQueue for LoggingJobQueue {
    fn queuedata(&self) -> Option<QueueData> {
        self.queuedata.clone()
    }

    fn abort_all(&self, signal: &str) {
        tracing::warn!(signal, "abort requested for all queued/running jobs");
    }

    fn report_state(&self, job: &Job, state: JobState) {
        let (cpu_secs, cpu_unit) = job.cpu_consumption();
        let heartbeat = json!({
            "job_id": job.id,
            "state": state.as_str(),
            "started_at": job.started_at.to_rfc3339(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "cpu_consumption_time": cpu_secs,
            "cpu_consumption_unit": cpu_unit,
            "max_workdir_size": job.workdir_sizes().iter().max().copied().unwrap_or(0),
            "error_codes": job.error_codes(),
        });
        tracing::debug!(%heartbeat, "job state report");
    }
}
