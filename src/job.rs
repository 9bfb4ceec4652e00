/// The single unit of work under supervision, plus its utility-process
/// records. The monitoring loop is the only writer of this structure;
/// every mutation goes through the narrow API below rather than open
/// field access.
use crate::errors::ErrorCode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

/// Lifecycle states of a supervised job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Starting,
    StageIn,
    Running,
    StageOut,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Starting => "starting",
            JobState::StageIn => "stagein",
            JobState::Running => "running",
            JobState::StageOut => "stageout",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(JobState::Starting),
            "stagein" => Ok(JobState::StageIn),
            "running" => Ok(JobState::Running),
            "stageout" => Ok(JobState::StageOut),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Minimal view of a utility subprocess, so the supervisor can poll for
/// exit without owning a concrete child type. The production impl wraps
/// `tokio::process::Child`; tests use scripted fakes.
pub trait UtilityHandle: Send {
    /// Exit code if the process has terminated, None while running.
    /// A signal death reports as Some(-1).
    fn try_exit_code(&mut self) -> Option<i32>;
}

/// One supervised auxiliary command attached to the job.
pub struct UtilityRecord {
    pub handle: Box<dyn UtilityHandle>,
    /// How many times this command has been launched (first launch = 1).
    pub launches: u32,
    /// Original command line, reused verbatim on restart.
    pub command: String,
    /// Output artifact the utility is expected to keep producing.
    pub output_filename: String,
}

impl UtilityRecord {
    pub fn new(handle: Box<dyn UtilityHandle>, command: String, output_filename: String) -> Self {
        Self {
            handle,
            launches: 1,
            command,
            output_filename,
        }
    }
}

/// The job under supervision.
pub struct Job {
    pub id: String,
    state: JobState,
    /// Payload process id; None before the payload has been launched.
    pub pid: Option<u32>,
    pub workdir: PathBuf,
    /// Input file names (relative to the work dir) that may be removed to
    /// reclaim space when a disk check fails the job.
    pub infiles: Vec<String>,
    /// Payload parameters; newline-separated blocks mean multiple sub-jobs,
    /// each with its own numbered stdout file.
    pub params: String,
    pub utilities: HashMap<String, UtilityRecord>,
    pub started_at: DateTime<Utc>,
    cpu_consumption_time: u64,
    cpu_consumption_unit: &'static str,
    workdir_sizes: Vec<u64>,
    error_codes: Vec<u32>,
    error_diagnostics: Vec<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            id: id.into(),
            state: JobState::Starting,
            pid: None,
            workdir,
            infiles: Vec::new(),
            params: String::new(),
            utilities: HashMap::new(),
            started_at: Utc::now(),
            cpu_consumption_time: 0,
            cpu_consumption_unit: "s",
            workdir_sizes: Vec::new(),
            error_codes: Vec::new(),
            error_diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// State transitions other than failure (failure goes through
    /// `mark_failed` so a code is always attached).
    pub fn set_state(&mut self, state: JobState) {
        if self.state != state {
            tracing::info!(job = %self.id, from = %self.state, to = %state, "job state change");
            self.state = state;
        }
    }

    /// Fail the job with a named error code. The payload kill itself is the
    /// caller's responsibility; this only records the decision. A check that
    /// keeps failing across ticks records its code once.
    pub fn mark_failed(&mut self, code: ErrorCode, diagnostics: impl Into<String>) {
        self.state = JobState::Failed;
        if self.error_codes.contains(&code.code()) {
            tracing::debug!(job = %self.id, %code, "error code already recorded");
            return;
        }
        let diagnostics = diagnostics.into();
        tracing::error!(job = %self.id, %code, diagnostics, "job failed");
        self.error_codes.push(code.code());
        self.error_diagnostics.push(diagnostics);
    }

    pub fn error_codes(&self) -> &[u32] {
        &self.error_codes
    }

    pub fn error_diagnostics(&self) -> &[String] {
        &self.error_diagnostics
    }

    /// Record a measured work-directory size. Zero measurements are
    /// discarded; the maximum of this history is reported with the final
    /// job metrics.
    pub fn add_workdir_size(&mut self, size: u64) {
        if size > 0 {
            self.workdir_sizes.push(size);
        }
    }

    pub fn workdir_sizes(&self) -> &[u64] {
        &self.workdir_sizes
    }

    pub fn set_cpu_consumption(&mut self, seconds: u64) {
        self.cpu_consumption_time = seconds;
    }

    pub fn cpu_consumption(&self) -> (u64, &'static str) {
        (self.cpu_consumption_time, self.cpu_consumption_unit)
    }

    /// Number of payload sub-jobs: one per newline-separated parameter
    /// block. A single-run payload has exactly one.
    pub fn sub_job_count(&self) -> usize {
        self.params.matches('\n').count() + 1
    }
}
