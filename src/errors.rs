/// Error taxonomy for the monitoring core.
///
/// Health checks never fail by returning `Err` — they return a
/// `CheckOutcome` carrying a numeric code plus diagnostics, and code 0
/// means success/no-action. Hard faults (the abort-escalation timeout,
/// startup problems) use `WardenError`.
use std::path::PathBuf;

/// Named error codes attached to a job when a check fails.
///
/// The numeric values travel with the heartbeat to the workload
/// management side, so they are stable identifiers, not just locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Payload stdout file grew past the configured limit.
    StdoutTooBig,
    /// Recursive work-directory size exceeded the allowed maximum.
    UserDirTooLarge,
    /// Local filesystem has too little free space to keep running.
    NoLocalSpace,
    /// An exception escaped a collaborator algorithm (absorbed, reported).
    UnknownException,
    /// Loop detection concluded the payload makes no forward progress.
    LoopingJob,
    /// Credential (proxy) verification failed or the proxy expired.
    NoProxy,
    /// Payload exceeded the site memory limit.
    PayloadExceedMaxMem,
    /// Agent lifetime limit was reached while the job was still running.
    ReachedMaxTime,
    /// Payload was killed by a signal sent from the monitor.
    KillSignal,
}

impl ErrorCode {
    /// Wire value reported to the workload management system.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::StdoutTooBig => 1106,
            ErrorCode::UserDirTooLarge => 1107,
            ErrorCode::NoLocalSpace => 1098,
            ErrorCode::UnknownException => 1110,
            ErrorCode::LoopingJob => 1111,
            ErrorCode::NoProxy => 1112,
            ErrorCode::PayloadExceedMaxMem => 1113,
            ErrorCode::ReachedMaxTime => 1114,
            ErrorCode::KillSignal => 1115,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCode::StdoutTooBig => "payload stdout too big",
            ErrorCode::UserDirTooLarge => "user work directory too large",
            ErrorCode::NoLocalSpace => "no local space left",
            ErrorCode::UnknownException => "unknown exception",
            ErrorCode::LoopingJob => "looping job detected",
            ErrorCode::NoProxy => "proxy verification failed",
            ErrorCode::PayloadExceedMaxMem => "payload exceeded memory limit",
            ErrorCode::ReachedMaxTime => "reached maximum agent lifetime",
            ErrorCode::KillSignal => "payload killed by monitor signal",
        };
        write!(f, "{} ({})", label, self.code())
    }
}

/// Uniform result of a single health check: exit code + diagnostics.
///
/// Code 0 means the check passed or had nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub code: u32,
    pub diagnostics: String,
}

impl CheckOutcome {
    /// Successful / no-action outcome.
    pub fn ok() -> Self {
        Self {
            code: 0,
            diagnostics: String::new(),
        }
    }

    /// Failed outcome carrying a named code and diagnostics text.
    pub fn failed(code: ErrorCode, diagnostics: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Hard faults raised out of the monitoring core.
///
/// Per-check failures are values (`CheckOutcome`), never errors; only the
/// conditions below escape as `Err`.
#[derive(Debug)]
pub enum WardenError {
    /// Failed to read or parse the configuration file.
    Config { path: PathBuf, reason: String },
    /// Failed to spawn a subprocess (utility relaunch, inspection command).
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The abort-escalation protocol ran out of time: the job never
    /// confirmed the abort within the escalation deadlines.
    AbortEscalationTimeout { waited_secs: u64 },
}

impl std::fmt::Display for WardenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WardenError::Config { path, reason } => {
                write!(f, "failed to load config {}: {}", path.display(), reason)
            }
            WardenError::Spawn { command, source } => {
                write!(f, "failed to spawn '{}': {}", command, source)
            }
            WardenError::AbortEscalationTimeout { waited_secs } => {
                write!(
                    f,
                    "exceeded maximum wait time ({} s) for job abort confirmation",
                    waited_secs
                )
            }
        }
    }
}

impl std::error::Error for WardenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WardenError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}
