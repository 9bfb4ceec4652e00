use clap::Parser;
use jobwarden::{checks, config, context, errors, job, monitor, signals, utilities, validators};
use std::path::PathBuf;
use std::sync::Arc;

/// Worker-node agent core: supervise a single running job with periodic
/// health checks (CPU, memory, credentials, looping detection, disk
/// quotas), keep its utility subprocesses alive, and coordinate a
/// bounded abort/shutdown sequence.
#[derive(Parser, Debug)]
#[command(name = "jobwarden", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Job identifier to supervise
    #[arg(long, default_value = "local")]
    job_id: String,

    /// Job work directory
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Payload process id (enables CPU sampling and kill-on-failure)
    #[arg(long)]
    pid: Option<u32>,

    /// Override the default lifetime in seconds
    #[arg(long)]
    lifetime: Option<u64>,

    /// Override the site user profile key
    #[arg(long)]
    user_profile: Option<String>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-check decisions, heartbeats)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress routine logging, only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn default_log_filter(cli: &Cli) -> &'static str {
    if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Forward OS signals into the session signal set: SIGINT asks for a
/// graceful stop, SIGTERM requests a job abort (which the escalation
/// turns into a stop if the job never confirms).
fn install_signal_forwarding(signals: &signals::SignalSet) {
    let graceful = signals.graceful_stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("SIGINT received, requesting graceful stop");
            graceful.set();
        }
    });

    let abort = signals.abort_job.clone();
    tokio::spawn(async move {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            tracing::warn!("could not install SIGTERM handler");
            return;
        };
        if sigterm.recv().await.is_some() {
            tracing::warn!("SIGTERM received, requesting job abort");
            abort.set();
        }
    });
}

async fn run(cli: Cli) -> Result<(), errors::WardenError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(lifetime) = cli.lifetime {
        config.session.lifetime = lifetime;
    }
    if let Some(profile) = &cli.user_profile {
        config.site.user_profile = profile.clone();
    }

    if cli.dry_run {
        println!("jobwarden v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("{config:#?}");
        println!("Dry run mode, config validated, not running.");
        return Ok(());
    }

    let signals = signals::SignalSet::new();
    install_signal_forwarding(&signals);

    let context = Arc::new(context::SessionContext::new(
        signals.clone(),
        context::now_epoch(),
    ));

    let registry = validators::ValidatorRegistry::with_builtin();
    let validator = registry.resolve(&config.site.user_profile);
    let battery = checks::CheckBattery::new(validator, Arc::new(validators::NoopLoopDetector));

    let queue: Arc<dyn validators::JobQueue> = Arc::new(validators::LoggingJobQueue::new(None));
    let launcher = utilities::ProcessUtilityLauncher::new(config.container.clone());
    let supervisor = utilities::UtilitySupervisor::new(Box::new(launcher));

    let mut job = job::Job::new(cli.job_id, cli.workdir);
    job.pid = cli.pid;
    if cli.pid.is_some() {
        job.set_state(job::JobState::Running);
    }

    tracing::info!(job = %job.id, workdir = %job.workdir.display(), "monitoring session starting");
    let mut monitor = monitor::MonitorLoop::new(config, context, queue, battery, supervisor);
    monitor.run(&mut job).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_filter(&cli))),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::info!("jobwarden starting");

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "jobwarden terminated with a hard fault");
        std::process::exit(1);
    }
}
