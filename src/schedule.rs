/// Interval gating for the health-check battery.
///
/// The control loop ticks every second, but each check runs at most once
/// per its configured interval. `MonitoringTime` keeps the last-run epoch
/// per check and answers "is this check due now?".
use crate::config::IntervalsConfig;
use std::collections::HashMap;

/// The fixed set of interval-gated checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Memory,
    Proxy,
    Looping,
    DiskSpace,
    Cpu,
}

impl Check {
    pub fn name(&self) -> &'static str {
        match self {
            Check::Memory => "memory",
            Check::Proxy => "proxy",
            Check::Looping => "looping",
            Check::DiskSpace => "diskspace",
            Check::Cpu => "cpu",
        }
    }
}

/// Per-check last-run timestamps for one monitoring session.
///
/// All entries start at the session start time, so each check first fires
/// one full interval into the session. Timestamps only move forward.
pub struct MonitoringTime {
    last_run: HashMap<Check, u64>,
    intervals: HashMap<Check, u64>,
}

impl MonitoringTime {
    pub fn new(intervals: &IntervalsConfig, session_start: u64) -> Self {
        let checks = [
            Check::Memory,
            Check::Proxy,
            Check::Looping,
            Check::DiskSpace,
            Check::Cpu,
        ];
        Self {
            last_run: checks.iter().map(|c| (*c, session_start)).collect(),
            intervals: HashMap::from([
                (Check::Memory, intervals.memory_usage_verification_time),
                (Check::Proxy, intervals.proxy_verification_time),
                (Check::Looping, intervals.looping_verification_time),
                (Check::DiskSpace, intervals.disk_space_verification_time),
                (Check::Cpu, intervals.cpu_consumption_sampling_time),
            ]),
        }
    }

    pub fn interval(&self, check: Check) -> u64 {
        self.intervals.get(&check).copied().unwrap_or(0)
    }

    pub fn last_run(&self, check: Check) -> u64 {
        self.last_run.get(&check).copied().unwrap_or(0)
    }

    /// A check is due when more than its interval has passed since the
    /// last completed run.
    pub fn is_due(&self, check: Check, now: u64) -> bool {
        now.saturating_sub(self.last_run(check)) > self.interval(check)
    }

    /// Record a completed run. Never moves a timestamp backwards.
    pub fn mark_done(&mut self, check: Check, now: u64) {
        let entry = self.last_run.entry(check).or_insert(now);
        if now > *entry {
            *entry = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(start: u64) -> MonitoringTime {
        MonitoringTime::new(&IntervalsConfig::default(), start)
    }

    #[test]
    fn test_not_due_within_interval() {
        let mt = mt(1000);
        // memory interval is 60 s
        assert!(!mt.is_due(Check::Memory, 1000));
        assert!(!mt.is_due(Check::Memory, 1060));
    }

    #[test]
    fn test_due_after_interval_elapses() {
        let mt = mt(1000);
        assert!(mt.is_due(Check::Memory, 1061));
        assert!(mt.is_due(Check::DiskSpace, 1301));
        assert!(!mt.is_due(Check::DiskSpace, 1300));
    }

    #[test]
    fn test_runs_at_most_once_per_interval() {
        let mut mt = mt(0);
        let mut runs = 0;
        // tick once per second for three minutes
        for now in 1..=180 {
            if mt.is_due(Check::Memory, now) {
                runs += 1;
                mt.mark_done(Check::Memory, now);
            }
        }
        // due at t=61 and t=122
        assert_eq!(runs, 2);
    }

    #[test]
    fn test_mark_done_is_monotonic() {
        let mut mt = mt(1000);
        mt.mark_done(Check::Proxy, 2000);
        mt.mark_done(Check::Proxy, 1500);
        assert_eq!(mt.last_run(Check::Proxy), 2000);
    }

    #[test]
    fn test_intervals_follow_config() {
        let intervals = IntervalsConfig {
            memory_usage_verification_time: 10,
            proxy_verification_time: 20,
            looping_verification_time: 30,
            disk_space_verification_time: 40,
            cpu_consumption_sampling_time: 50,
        };
        let mt = MonitoringTime::new(&intervals, 0);
        assert!(mt.is_due(Check::Memory, 11));
        assert!(!mt.is_due(Check::Proxy, 20));
        assert!(mt.is_due(Check::Proxy, 21));
        assert!(mt.is_due(Check::Looping, 31));
        assert!(mt.is_due(Check::DiskSpace, 41));
        assert!(!mt.is_due(Check::Cpu, 50));
        assert!(mt.is_due(Check::Cpu, 51));
    }
}
