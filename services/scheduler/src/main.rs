//! coloc scheduler
//!
//! Co-locates a latency-critical service with batch jobs on a small
//! fixed-core machine. Each tick the scheduler samples CPU usage, moves
//! the latency-critical service's core budget by at most one step, and
//! lets the scheduling policy drive batch containers over the leftover
//! cores.
//!
//! ## Architecture
//!
//! - **CPU sampler**: per-core busy percentages from /proc/stat
//! - **Core budget**: hysteresis over the latency service's core count
//! - **Policy**: class queues + running slots over the available cores
//! - **Runtime**: container lifecycle via the Docker Engine socket

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coloc_events::{EventSink, JsonlEventLog};
use coloc_scheduler::catalog;
use coloc_scheduler::config::Config;
use coloc_scheduler::cpu::ProcStatSampler;
use coloc_scheduler::policy::{ClassPolicy, Policy};
use coloc_scheduler::runtime::{ContainerRuntime, DockerRuntime, MockRuntime};
use coloc_scheduler::scheduler::Scheduler;
use coloc_scheduler::service::{LatencyService, MemcachedService, NullLatencyService};

/// Which class pair the policy schedules.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// 1-core and 2-core job classes.
    OneTwo,
    /// 2-core and 3-core job classes.
    TwoThree,
}

#[derive(Debug, Parser)]
#[command(name = "scheduler", about = "Core-budget scheduler for co-located workloads")]
struct Cli {
    /// Scheduling strategy.
    #[arg(long, value_enum, default_value_t = Strategy::OneTwo)]
    strategy: Strategy,

    /// JSON catalog file; defaults to the built-in PARSEC set.
    #[arg(long)]
    catalog: Option<std::path::PathBuf>,

    /// Docker Engine socket path.
    #[arg(long, env = "COLOC_DOCKER_SOCKET")]
    docker_socket: Option<String>,

    /// Event log path (JSON lines).
    #[arg(long, env = "COLOC_EVENT_LOG")]
    event_log: Option<String>,

    /// Number of physical cores on the machine.
    #[arg(long, env = "COLOC_TOTAL_CORES")]
    total_cores: Option<usize>,

    /// Use the mock runtime and skip memcached discovery.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(socket) = cli.docker_socket.clone() {
        config.docker_socket = socket;
    }
    if let Some(path) = cli.event_log.clone() {
        config.event_log = path;
    }
    if let Some(cores) = cli.total_cores {
        config.total_cores = cores;
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        strategy = ?cli.strategy,
        total_cores = config.total_cores,
        docker_socket = %config.docker_socket,
        event_log = %config.event_log,
        "Configuration loaded"
    );

    let specs = match &cli.catalog {
        Some(path) => catalog::load_catalog(path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        None => catalog::default_catalog(),
    };

    let events: Arc<dyn EventSink> =
        Arc::new(JsonlEventLog::open(&config.event_log).context("failed to open event log")?);

    let runtime: Arc<dyn ContainerRuntime> = if cli.dry_run {
        Arc::new(MockRuntime::auto_completing(5))
    } else {
        Arc::new(DockerRuntime::new(&config.docker_socket)?)
    };

    let service: Box<dyn LatencyService> = if cli.dry_run {
        Box::new(NullLatencyService)
    } else {
        Box::new(MemcachedService::discover().await?)
    };

    let mut policy = match cli.strategy {
        Strategy::OneTwo => ClassPolicy::one_and_two_cores(runtime, Arc::clone(&events)),
        Strategy::TwoThree => ClassPolicy::two_and_three_cores(runtime, Arc::clone(&events)),
    };
    for spec in specs {
        policy.add_job(spec);
    }

    let sampler = Box::new(ProcStatSampler::new(config.tick_interval));
    let mut scheduler = Scheduler::new(&config, policy, sampler, service, events);

    let elapsed = scheduler.run().await?;
    info!(elapsed_secs = elapsed.as_secs_f64(), "Scheduler finished");
    Ok(())
}
