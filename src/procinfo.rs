/// Process-table inspection via `ps`. Purely diagnostic: any failure to
/// run or parse the process table degrades to an empty result with a
/// warning, never an error up the stack.
use crate::process::execute;
use std::collections::HashMap;
use std::time::Duration;

/// How long a single `ps` invocation may take.
const PS_TIMEOUT: Duration = Duration::from_secs(10);

/// One row from the process table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    /// CPU usage in percent.
    pub cpu: f32,
    /// Memory usage in percent.
    pub mem: f32,
    pub command: String,
}

/// List processes owned by `user` whose command line contains `pattern`.
pub async fn list_processes(pattern: &str, user: &str) -> Vec<ProcessSample> {
    let command = format!("ps -u {user} -o pid=,pcpu=,pmem=,args=");
    match execute(&command, None, PS_TIMEOUT).await {
        Ok(result) if result.success() => parse_ps_table(&result.stdout, pattern),
        Ok(result) => {
            tracing::warn!(exit_code = ?result.exit_code, "ps query failed");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not invoke ps");
            Vec::new()
        }
    }
}

/// Parse `ps -o pid=,pcpu=,pmem=,args=` output, keeping rows whose command
/// contains `pattern`. Malformed rows are skipped.
fn parse_ps_table(table: &str, pattern: &str) -> Vec<ProcessSample> {
    let mut samples = Vec::new();
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(cpu), Some(mem)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let command = fields.collect::<Vec<_>>().join(" ");
        if !command.contains(pattern) {
            continue;
        }
        let (Ok(pid), Ok(cpu), Ok(mem)) = (pid.parse(), cpu.parse(), mem.parse()) else {
            continue;
        };
        samples.push(ProcessSample {
            pid,
            cpu,
            mem,
            command,
        });
    }
    samples
}

/// Total accumulated CPU time (s) of the process tree rooted at `pid`,
/// summed from the TIME column over the root and all descendants.
pub async fn cpu_consumption_time(pid: u32) -> u64 {
    let command = "ps -ax -o pid=,ppid=,time=";
    match execute(command, None, PS_TIMEOUT).await {
        Ok(result) if result.success() => sum_tree_cpu_time(&result.stdout, pid),
        Ok(result) => {
            tracing::warn!(exit_code = ?result.exit_code, "ps query for cpu time failed");
            0
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not invoke ps for cpu time");
            0
        }
    }
}

/// Sum the TIME column over the process tree rooted at `root` in a
/// `pid ppid time` table.
fn sum_tree_cpu_time(table: &str, root: u32) -> u64 {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut cpu_time: HashMap<u32, u64> = HashMap::new();

    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(time)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
            continue;
        };
        let Some(secs) = parse_cpu_time(time) else {
            continue;
        };
        children.entry(ppid).or_default().push(pid);
        cpu_time.insert(pid, secs);
    }

    let mut total = 0;
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        total += cpu_time.get(&pid).copied().unwrap_or(0);
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids);
        }
    }
    total
}

/// Parse a ps TIME value: [[DD-]HH:]MM:SS.
fn parse_cpu_time(value: &str) -> Option<u64> {
    let (days, rest) = match value.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, value),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (
            h.parse::<u64>().ok()?,
            m.parse::<u64>().ok()?,
            s.parse::<u64>().ok()?,
        ),
        [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        _ => return None,
    };
    Some(days * 86_400 + hours * 3600 + minutes * 60 + seconds)
}
