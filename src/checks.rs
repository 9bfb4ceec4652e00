/// The health-check battery. Each check self-gates on its MonitoringTime
/// interval, runs in a fixed order (memory, proxy, looping, disk), and
/// the first non-zero outcome short-circuits the rest of the battery for
/// that tick. Checks report failure as a `CheckOutcome`, never as `Err`.
use crate::config::WardenConfig;
use crate::disk;
use crate::errors::{CheckOutcome, ErrorCode};
use crate::job::Job;
use crate::procinfo;
use crate::queuedata::QueueData;
use crate::schedule::{Check, MonitoringTime};
use crate::validators::{LoopDetector, SiteValidator};
use std::sync::Arc;

pub struct CheckBattery {
    validator: Arc<dyn SiteValidator>,
    loop_detector: Arc<dyn LoopDetector>,
}

impl CheckBattery {
    pub fn new(validator: Arc<dyn SiteValidator>, loop_detector: Arc<dyn LoopDetector>) -> Self {
        Self {
            validator,
            loop_detector,
        }
    }

    /// Run all due checks against the job. Called once per tick; the
    /// interval gates keep each check at its own cadence.
    pub async fn run(
        &self,
        job: &mut Job,
        mt: &mut MonitoringTime,
        queuedata: Option<&QueueData>,
        config: &WardenConfig,
        now: u64,
    ) -> CheckOutcome {
        // CPU accounting first, while the payload is alive to be sampled
        if job.is_running() {
            if mt.is_due(Check::Cpu, now) {
                if let Some(pid) = job.pid {
                    let cpu_secs = procinfo::cpu_consumption_time(pid).await;
                    job.set_cpu_consumption(cpu_secs);
                    tracing::info!(job = %job.id, pid, cpu_secs, "payload cpu consumption time");
                }
                mt.mark_done(Check::Cpu, now);
            }

            let outcome = self.verify_memory_usage(job, mt, now);
            if !outcome.is_ok() {
                return outcome;
            }
        }

        if config.site.verify_proxy {
            let outcome = self.verify_proxy(mt, now);
            if !outcome.is_ok() {
                return outcome;
            }
        }

        let outcome = self.verify_looping_job(job, mt, now);
        if !outcome.is_ok() {
            return outcome;
        }

        let outcome = self
            .verify_disk_usage(job, mt, queuedata, config, now)
            .await;
        if !outcome.is_ok() {
            return outcome;
        }

        CheckOutcome::ok()
    }

    /// Memory check: only for running jobs, only when the site validator
    /// enables it, at the memory interval.
    fn verify_memory_usage(&self, job: &Job, mt: &mut MonitoringTime, now: u64) -> CheckOutcome {
        if !self.validator.memory_check_enabled() {
            return CheckOutcome::ok();
        }
        if !mt.is_due(Check::Memory, now) {
            return CheckOutcome::ok();
        }
        let outcome = self.validator.check_memory(job);
        if outcome.is_ok() {
            mt.mark_done(Check::Memory, now);
        }
        outcome
    }

    /// Credential check at the proxy interval, independent of job state.
    fn verify_proxy(&self, mt: &mut MonitoringTime, now: u64) -> CheckOutcome {
        if !mt.is_due(Check::Proxy, now) {
            return CheckOutcome::ok();
        }
        let outcome = self.validator.check_proxy();
        if outcome.is_ok() {
            mt.mark_done(Check::Proxy, now);
        }
        outcome
    }

    /// Loop detection at the looping interval. A crash inside the
    /// detection algorithm is absorbed and reported as an unknown
    /// exception; it never propagates.
    fn verify_looping_job(&self, job: &Job, mt: &mut MonitoringTime, now: u64) -> CheckOutcome {
        if !mt.is_due(Check::Looping, now) {
            return CheckOutcome::ok();
        }
        match self.loop_detector.detect_loop(job, mt) {
            Ok(outcome) => {
                if outcome.is_ok() {
                    mt.mark_done(Check::Looping, now);
                }
                outcome
            }
            Err(message) => {
                let diagnostics = format!("exception caught in looping job algorithm: {message}");
                tracing::warn!(job = %job.id, "{diagnostics}");
                CheckOutcome::failed(ErrorCode::UnknownException, diagnostics)
            }
        }
    }

    /// The three disk sub-checks, in order, under one interval.
    async fn verify_disk_usage(
        &self,
        job: &mut Job,
        mt: &mut MonitoringTime,
        queuedata: Option<&QueueData>,
        config: &WardenConfig,
        now: u64,
    ) -> CheckOutcome {
        if !mt.is_due(Check::DiskSpace, now) {
            return CheckOutcome::ok();
        }

        let outcome = disk::check_payload_stdout(job, config).await;
        if !outcome.is_ok() {
            return outcome;
        }

        let outcome = disk::check_local_space(&job.workdir, config.free_space_limit_bytes());
        if !outcome.is_ok() {
            return outcome;
        }

        let outcome = disk::check_work_dir(job, queuedata, config).await;
        if !outcome.is_ok() {
            return outcome;
        }

        mt.mark_done(Check::DiskSpace, now);
        CheckOutcome::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntervalsConfig;
    use crate::job::JobState;
    use crate::validators::NoopLoopDetector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingValidator {
        memory_enabled: bool,
        memory_calls: AtomicUsize,
        proxy_calls: AtomicUsize,
        proxy_outcome_code: Option<ErrorCode>,
    }

    impl CountingValidator {
        fn new(memory_enabled: bool) -> Self {
            Self {
                memory_enabled,
                memory_calls: AtomicUsize::new(0),
                proxy_calls: AtomicUsize::new(0),
                proxy_outcome_code: None,
            }
        }
    }

    impl SiteValidator for CountingValidator {
        fn memory_check_enabled(&self) -> bool {
            self.memory_enabled
        }
        fn check_memory(&self, _job: &Job) -> CheckOutcome {
            self.memory_calls.fetch_add(1, Ordering::SeqCst);
            CheckOutcome::ok()
        }
        fn check_proxy(&self) -> CheckOutcome {
            self.proxy_calls.fetch_add(1, Ordering::SeqCst);
            match self.proxy_outcome_code {
                Some(code) => CheckOutcome::failed(code, "proxy expired"),
                None => CheckOutcome::ok(),
            }
        }
    }

    struct CrashingLoopDetector;
    impl LoopDetector for CrashingLoopDetector {
        fn detect_loop(&self, _job: &Job, _mt: &MonitoringTime) -> Result<CheckOutcome, String> {
            Err("index out of range".to_string())
        }
    }

    fn running_job(dir: &TempDir) -> Job {
        let mut job = Job::new("123", dir.path().to_path_buf());
        job.set_state(JobState::Running);
        job
    }

    fn mt(start: u64) -> MonitoringTime {
        MonitoringTime::new(&IntervalsConfig::default(), start)
    }

    #[tokio::test]
    async fn test_memory_check_gated_by_interval() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        let validator = Arc::new(CountingValidator::new(true));
        let battery = CheckBattery::new(validator.clone(), Arc::new(NoopLoopDetector));
        let config = WardenConfig::default();
        let mut mt = mt(1000);

        // within the 60 s memory interval: not run
        battery.run(&mut job, &mut mt, None, &config, 1030).await;
        assert_eq!(validator.memory_calls.load(Ordering::SeqCst), 0);

        // past the interval: run once
        battery.run(&mut job, &mut mt, None, &config, 1061).await;
        assert_eq!(validator.memory_calls.load(Ordering::SeqCst), 1);

        // immediately again: gated
        battery.run(&mut job, &mut mt, None, &config, 1062).await;
        assert_eq!(validator.memory_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cpu_sampling_gated_by_interval() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        job.pid = Some(std::process::id());
        let battery = CheckBattery::new(
            Arc::new(CountingValidator::new(false)),
            Arc::new(NoopLoopDetector),
        );
        let mut config = WardenConfig::default();
        config.site.verify_proxy = false;
        let mut mt = mt(1000);

        // within the 60 s sampling interval: no sample taken
        battery.run(&mut job, &mut mt, None, &config, 1030).await;
        assert_eq!(mt.last_run(Check::Cpu), 1000);

        // past the interval: sampled and marked done
        battery.run(&mut job, &mut mt, None, &config, 1061).await;
        assert_eq!(mt.last_run(Check::Cpu), 1061);
    }

    #[tokio::test]
    async fn test_memory_check_skipped_when_not_running() {
        let dir = TempDir::new().unwrap();
        let mut job = Job::new("123", dir.path().to_path_buf());
        let validator = Arc::new(CountingValidator::new(true));
        let battery = CheckBattery::new(validator.clone(), Arc::new(NoopLoopDetector));
        let config = WardenConfig::default();
        let mut mt = mt(0);

        battery.run(&mut job, &mut mt, None, &config, 10_000).await;
        assert_eq!(validator.memory_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_proxy_failure_short_circuits_battery() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        let mut validator = CountingValidator::new(false);
        validator.proxy_outcome_code = Some(ErrorCode::NoProxy);
        let battery = CheckBattery::new(Arc::new(validator), Arc::new(CrashingLoopDetector));
        let config = WardenConfig::default();
        let mut mt = mt(0);

        // proxy fails at its interval; the crashing loop detector after it
        // must never be reached
        let outcome = battery.run(&mut job, &mut mt, None, &config, 601).await;
        assert_eq!(outcome.code, ErrorCode::NoProxy.code());
    }

    #[tokio::test]
    async fn test_proxy_check_disabled_by_config() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        let validator = Arc::new(CountingValidator::new(false));
        let battery = CheckBattery::new(validator.clone(), Arc::new(NoopLoopDetector));
        let mut config = WardenConfig::default();
        config.site.verify_proxy = false;
        let mut mt = mt(0);

        battery.run(&mut job, &mut mt, None, &config, 10_000).await;
        assert_eq!(validator.proxy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_looping_crash_becomes_unknown_exception() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        let battery = CheckBattery::new(
            Arc::new(CountingValidator::new(false)),
            Arc::new(CrashingLoopDetector),
        );
        let mut config = WardenConfig::default();
        config.site.verify_proxy = false;
        let mut mt = mt(0);

        let outcome = battery.run(&mut job, &mut mt, None, &config, 601).await;
        assert_eq!(outcome.code, ErrorCode::UnknownException.code());
        assert!(outcome.diagnostics.contains("index out of range"));
        // absorbed, not failed: the job itself is untouched
        assert_eq!(job.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_disk_checks_run_at_disk_interval() {
        let dir = TempDir::new().unwrap();
        let mut job = running_job(&dir);
        job.infiles = vec!["in.data".to_string()];
        std::fs::write(dir.path().join("in.data"), vec![0u8; 16]).unwrap();
        std::fs::write(
            dir.path().join("payload.stdout.txt"),
            vec![0u8; 3 * 1024 * 1024],
        )
        .unwrap();

        let battery = CheckBattery::new(
            Arc::new(CountingValidator::new(false)),
            Arc::new(NoopLoopDetector),
        );
        let mut config = WardenConfig::default();
        config.site.verify_proxy = false;
        let mut mt = mt(1000);

        // before the 300 s disk interval nothing happens
        let outcome = battery.run(&mut job, &mut mt, None, &config, 1100).await;
        assert!(outcome.is_ok());
        assert_eq!(job.state(), JobState::Running);

        // at 301 s the oversized stdout fails the job
        let outcome = battery.run(&mut job, &mut mt, None, &config, 1301).await;
        assert_eq!(outcome.code, ErrorCode::StdoutTooBig.code());
        assert_eq!(job.state(), JobState::Failed);
        assert!(!dir.path().join("in.data").exists());
    }
}
