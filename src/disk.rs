/// Disk-related health checks: payload stdout size, local free space, and
/// work-directory size. All three run together under the single disk-space
/// interval; the first two failures kill the payload and fail the job,
/// the free-space shortage is only reported (it may be transient and is
/// the caller's decision).
use crate::config::WardenConfig;
use crate::errors::{CheckOutcome, ErrorCode};
use crate::job::Job;
use crate::process::{execute, kill_processes};
use crate::queuedata::{max_allowed_workdir_size, QueueData};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tarred log archive exempt from the stdout size check.
const SPECIAL_LOG_ARCHIVE: &str = "job.log.tgz";

/// Time budget for the diagnostic directory listing.
const LISTING_TIMEOUT: Duration = Duration::from_secs(30);

/// Recursive size in bytes of everything under `dir`. Unreadable entries
/// are skipped; a missing directory counts as zero.
pub fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            total += directory_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

/// Remove lingering input files from the work dir to reclaim space after
/// a disk check failed the job. Returns how many files were removed.
fn remove_input_files(job: &Job) -> usize {
    let mut removed = 0;
    for name in &job.infiles {
        let path = job.workdir.join(name);
        if !path.exists() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(file = %path.display(), "removed lingering input file");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "could not remove input file");
            }
        }
    }
    removed
}

/// The files whose size the stdout check inspects: one payload stdout per
/// sub-job (numbered when there is more than one) plus any produced
/// `log.*` files.
fn stdout_check_candidates(job: &Job, payload_stdout: &str) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    let log_pattern = job.workdir.join("log.*");
    if let Ok(paths) = glob::glob(&log_pattern.to_string_lossy()) {
        candidates.extend(paths.flatten());
    }

    let n_jobs = job.sub_job_count();
    for i in 0..n_jobs {
        let name = if n_jobs > 1 {
            payload_stdout.replace(".txt", &format!("_{}.txt", i + 1))
        } else {
            payload_stdout.to_string()
        };
        candidates.push(job.workdir.join(name));
    }

    candidates
}

/// Check the size of every payload stdout / log file; any file over the
/// limit kills the payload and fails the job.
pub async fn check_payload_stdout(job: &mut Job, config: &WardenConfig) -> CheckOutcome {
    let limit = config.stdout_size_limit_bytes();

    for path in stdout_check_candidates(job, &config.payload.payload_stdout) {
        if path.to_string_lossy().contains(SPECIAL_LOG_ARCHIVE) {
            tracing::info!(file = %path.display(), "skipping size check of special log archive");
            continue;
        }
        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            // not created yet, nothing to check
            Err(_) => continue,
        };

        if size > limit {
            let diagnostics = format!(
                "payload stdout file {} too big: {} B (larger than limit {} B)",
                path.display(),
                size,
                limit
            );
            tracing::error!(job = %job.id, "{diagnostics}");
            if let Some(pid) = job.pid {
                kill_processes(pid).await;
            }
            job.mark_failed(ErrorCode::StdoutTooBig, &diagnostics);
            remove_input_files(job);
            return CheckOutcome::failed(ErrorCode::StdoutTooBig, diagnostics);
        }
        tracing::info!(
            file = %path.display(),
            size,
            limit,
            "payload stdout within allowed size limit"
        );
    }

    CheckOutcome::ok()
}

/// Check that the local filesystem still has room to keep running the
/// job. Reports a shortage without mutating the job.
pub fn check_local_space(workdir: &Path, free_space_limit: u64) -> CheckOutcome {
    let probe = if workdir.exists() {
        workdir
    } else {
        Path::new(".")
    };
    let space_left = match fs2::available_space(probe) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %probe.display(), error = %e, "could not query free space");
            return CheckOutcome::ok();
        }
    };

    if space_left <= free_space_limit {
        let diagnostics = format!(
            "too little space left on local disk to run job: {} B (need > {} B)",
            space_left, free_space_limit
        );
        tracing::warn!("{diagnostics}");
        return CheckOutcome::failed(ErrorCode::NoLocalSpace, diagnostics);
    }

    tracing::info!(space_left, "sufficient remaining disk space");
    CheckOutcome::ok()
}

/// Check the recursive size of the work directory against the resolved
/// maximum. Over the limit: log a listing, kill the payload, fail the
/// job, drop input files, re-measure. The measured size is recorded on
/// the job either way.
pub async fn check_work_dir(
    job: &mut Job,
    queuedata: Option<&QueueData>,
    config: &WardenConfig,
) -> CheckOutcome {
    if !job.workdir.exists() {
        tracing::warn!(workdir = %job.workdir.display(), "skipping size check of work dir, not created yet");
        return CheckOutcome::ok();
    }

    let max_size = max_allowed_workdir_size(queuedata, config.stdout_size_limit_bytes());
    let mut size = directory_size(&job.workdir);
    let mut outcome = CheckOutcome::ok();

    if size > max_size {
        let diagnostics = format!(
            "work directory ({}) is too large: {} B (must be < {} B)",
            job.workdir.display(),
            size,
            max_size
        );
        tracing::error!(job = %job.id, "{diagnostics}");

        log_directory_listing(&job.workdir).await;

        if let Some(pid) = job.pid {
            kill_processes(pid).await;
        }
        job.mark_failed(ErrorCode::UserDirTooLarge, &diagnostics);

        if remove_input_files(job) > 0 {
            // record the reclaimed size, not the offending one
            size = directory_size(&job.workdir);
        }
        outcome = CheckOutcome::failed(ErrorCode::UserDirTooLarge, diagnostics);
    } else {
        tracing::info!(
            workdir = %job.workdir.display(),
            size,
            max_size,
            "work directory size within limit"
        );
    }

    job.add_workdir_size(size);
    outcome
}

/// Dump an `ls -altrR` of the work dir into the log for post-mortem use.
async fn log_directory_listing(workdir: &Path) {
    let command = format!("ls -altrR {}", workdir.display());
    match execute(&command, None, LISTING_TIMEOUT).await {
        Ok(result) => tracing::info!(listing = %result.stdout, "work directory listing"),
        Err(e) => tracing::warn!(error = %e, "could not produce work directory listing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use tempfile::TempDir;

    fn job_in_dir(dir: &TempDir) -> Job {
        let mut job = Job::new("123", dir.path().to_path_buf());
        job.set_state(JobState::Running);
        job
    }

    fn write_file(dir: &TempDir, name: &str, bytes: usize) {
        std::fs::write(dir.path().join(name), vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_directory_size_recursive() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a", 100);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 250]).unwrap();
        assert_eq!(directory_size(dir.path()), 350);
        assert_eq!(directory_size(&dir.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn test_stdout_within_limit_is_ok() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        let config = WardenConfig::default();
        write_file(&dir, "payload.stdout.txt", 1024);

        let outcome = check_payload_stdout(&mut job, &config).await;
        assert!(outcome.is_ok());
        assert_eq!(job.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_stdout_too_big_fails_job_and_removes_inputs() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        job.infiles = vec!["input.data".to_string()];
        write_file(&dir, "input.data", 64);
        // 3 MiB stdout against the default 2 MiB limit
        write_file(&dir, "payload.stdout.txt", 3 * 1024 * 1024);

        let config = WardenConfig::default();
        let outcome = check_payload_stdout(&mut job, &config).await;

        assert_eq!(outcome.code, ErrorCode::StdoutTooBig.code());
        assert_eq!(job.state(), JobState::Failed);
        assert!(job.error_codes().contains(&ErrorCode::StdoutTooBig.code()));
        assert!(!dir.path().join("input.data").exists());
    }

    #[tokio::test]
    async fn test_stdout_failure_every_tick_records_code_once() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        write_file(&dir, "payload.stdout.txt", 3 * 1024 * 1024);
        let config = WardenConfig::default();

        // the oversized file stays in place, so the check keeps failing
        for _ in 0..3 {
            let outcome = check_payload_stdout(&mut job, &config).await;
            assert_eq!(outcome.code, ErrorCode::StdoutTooBig.code());
        }
        assert_eq!(job.error_codes(), &[ErrorCode::StdoutTooBig.code()]);
    }

    #[tokio::test]
    async fn test_stdout_check_skips_special_archive_and_counts_log_files() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        let config = WardenConfig::default();
        // oversized special archive must be ignored
        write_file(&dir, "log.job.log.tgz", 3 * 1024 * 1024);

        let outcome = check_payload_stdout(&mut job, &config).await;
        assert!(outcome.is_ok());

        // an oversized regular log file fails the check
        write_file(&dir, "log.extract", 3 * 1024 * 1024);
        let outcome = check_payload_stdout(&mut job, &config).await;
        assert_eq!(outcome.code, ErrorCode::StdoutTooBig.code());
    }

    #[tokio::test]
    async fn test_stdout_check_multi_run_names() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        job.params = "run one\nrun two".to_string();
        let config = WardenConfig::default();
        write_file(&dir, "payload.stdout_2.txt", 3 * 1024 * 1024);

        let outcome = check_payload_stdout(&mut job, &config).await;
        assert_eq!(outcome.code, ErrorCode::StdoutTooBig.code());
        assert!(outcome.diagnostics.contains("payload.stdout_2.txt"));
    }

    #[test]
    fn test_local_space_shortage_reported_not_fatal_to_job() {
        let dir = TempDir::new().unwrap();
        // u64::MAX limit: any real filesystem is "too full"
        let outcome = check_local_space(dir.path(), u64::MAX);
        assert_eq!(outcome.code, ErrorCode::NoLocalSpace.code());

        let outcome = check_local_space(dir.path(), 0);
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_work_dir_within_limit_records_size_only() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        write_file(&dir, "payload.stdout.txt", 500);

        let outcome = check_work_dir(&mut job, None, &WardenConfig::default()).await;
        assert!(outcome.is_ok());
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.workdir_sizes(), &[500]);
    }

    #[tokio::test]
    async fn test_work_dir_too_large_fails_job_and_remeasures() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in_dir(&dir);
        job.infiles = vec!["big.input".to_string()];
        write_file(&dir, "big.input", 4096);
        write_file(&dir, "other.file", 100);

        // queue allows 0 MB, so any content is over the limit
        let queuedata = QueueData {
            maxtime: None,
            maxwdir: Some("0".to_string()),
        };
        let outcome = check_work_dir(&mut job, Some(&queuedata), &WardenConfig::default()).await;

        assert_eq!(outcome.code, ErrorCode::UserDirTooLarge.code());
        assert_eq!(job.state(), JobState::Failed);
        assert!(!dir.path().join("big.input").exists());
        // re-measured size excludes the removed input file
        assert_eq!(job.workdir_sizes(), &[100]);
    }

    #[tokio::test]
    async fn test_work_dir_missing_is_skipped() {
        let mut job = Job::new("123", PathBuf::from("/nonexistent/workdir-xyz"));
        let outcome = check_work_dir(&mut job, None, &WardenConfig::default()).await;
        assert!(outcome.is_ok());
        assert!(job.workdir_sizes().is_empty());
    }
}
