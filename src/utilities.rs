/// Supervision of auxiliary utility subprocesses attached to the job
/// (e.g. a memory-monitor helper). These are expected to run for the
/// whole job lifetime; a crashed one is relaunched with its original
/// command line up to a fixed cap, then left dead for the session.
use crate::config::ContainerConfig;
use crate::errors::WardenError;
use crate::job::{Job, UtilityHandle};
use crate::process;
use std::path::Path;

/// A utility command is launched at most this many times in one session
/// (counting the initial launch).
pub const MAX_UTILITY_LAUNCHES: u32 = 5;

/// Seam for launching utility subprocesses, so the supervisor logic can
/// be exercised without spawning real processes.
pub trait UtilityLauncher: Send + Sync {
    fn launch(&self, command: &str, workdir: &Path) -> Result<Box<dyn UtilityHandle>, WardenError>;
}

/// Production launcher: spawns through the process module, honoring the
/// container configuration.
pub struct ProcessUtilityLauncher {
    container: ContainerConfig,
}

impl ProcessUtilityLauncher {
    pub fn new(container: ContainerConfig) -> Self {
        Self { container }
    }
}

impl UtilityLauncher for ProcessUtilityLauncher {
    fn launch(&self, command: &str, workdir: &Path) -> Result<Box<dyn UtilityHandle>, WardenError> {
        process::spawn_utility(command, workdir, &self.container)
    }
}

pub struct UtilitySupervisor {
    launcher: Box<dyn UtilityLauncher>,
}

impl UtilitySupervisor {
    pub fn new(launcher: Box<dyn UtilityLauncher>) -> Self {
        Self { launcher }
    }

    /// One supervision pass over all utility records: restart crashed
    /// processes (within the cap), verify output artifacts of live ones.
    pub fn supervise(&self, job: &mut Job) {
        let workdir = job.workdir.clone();
        for (name, record) in job.utilities.iter_mut() {
            match record.handle.try_exit_code() {
                Some(exit_code) => {
                    // utilities run for the whole job lifetime, so any
                    // exit here is a crash
                    if record.launches <= MAX_UTILITY_LAUNCHES {
                        tracing::warn!(
                            utility = %name,
                            exit_code,
                            launches = record.launches,
                            "detected crashed utility subprocess, restarting it"
                        );
                        match self.launcher.launch(&record.command, &workdir) {
                            Ok(handle) => {
                                record.handle = handle;
                                record.launches += 1;
                            }
                            Err(e) => {
                                tracing::error!(utility = %name, error = %e, "could not relaunch utility");
                            }
                        }
                    } else {
                        tracing::warn!(
                            utility = %name,
                            "detected crashed utility subprocess, too many restarts, will not restart again"
                        );
                    }
                }
                None => {
                    let path = workdir.join(&record.output_filename);
                    if path.exists() {
                        tracing::debug!(utility = %name, file = %path.display(), "utility output file exists");
                    } else {
                        tracing::warn!(utility = %name, file = %path.display(), "utility output file does not exist");
                    }
                }
            }
        }
    }
}
