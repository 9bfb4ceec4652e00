//! jobwarden: the health-monitoring core of a worker-node agent.
//!
//! Supervises exactly one running job: a 1-second control loop drives a
//! battery of interval-gated health checks (memory, credentials, looping
//! detection, disk quotas), keeps the job's utility subprocesses alive,
//! and turns an external abort request into a bounded escalation
//! sequence. Site-specific behavior plugs in through the traits in
//! [`validators`].

pub mod abort;
pub mod checks;
pub mod config;
pub mod context;
pub mod disk;
pub mod errors;
pub mod job;
pub mod monitor;
pub mod process;
pub mod procinfo;
pub mod queuedata;
pub mod schedule;
pub mod signals;
pub mod utilities;
pub mod validators;
