//! Treecast benchmark
//!
//! Builds a multicast tree on a simulated network, runs a workload through
//! it and reports traffic metrics.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use treecast::Simulation;

mod config;
mod metrics;
mod workloads;

use config::BenchConfig;
use metrics::{Metric, Report};
use workloads::WorkloadKind;

/// Benchmark multicast tree configurations
#[derive(Parser, Debug)]
#[command(name = "treecast-bench")]
#[command(about = "Benchmark multicast tree configurations", long_about = None)]
struct Args {
    /// Number of routers besides the root
    #[arg(short = 'r', long)]
    routers: Option<usize>,

    /// Number of workers (enclaves)
    #[arg(short = 'e', long)]
    enclaves: Option<usize>,

    /// Child capacity of non-root routers [default: 1024]
    #[arg(short = 'b', long)]
    branch: Option<usize>,

    /// Child capacity of the root router [default: branch]
    #[arg(long)]
    root_branch: Option<usize>,

    /// Workload to run [default: fruits-of-my-labor]
    #[arg(short = 'w', long, value_enum)]
    workload: Option<WorkloadKind>,

    /// Number of tasks [default: depends on the workload]
    #[arg(long)]
    tasks: Option<usize>,

    /// Flood key updates to every child
    #[arg(long)]
    disable_sharding: bool,

    /// Metric to report (repeatable)
    #[arg(short = 'm', long = "metric", value_enum)]
    metrics: Vec<Metric>,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Executor sleep scale per key, in milliseconds
    #[arg(long)]
    base_sleep_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Merge the config file (if any) with explicit flags
    fn into_config(self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };

        let simulation = &mut config.simulation;
        if let Some(routers) = self.routers {
            simulation.routers = routers;
        }
        if let Some(workers) = self.enclaves {
            simulation.workers = workers;
        }
        if let Some(branch) = self.branch {
            simulation.branch = branch;
        }
        if self.root_branch.is_some() {
            simulation.root_branch = self.root_branch;
        }
        if self.disable_sharding {
            simulation.sharding = false;
        }
        if let Some(base_sleep_ms) = self.base_sleep_ms {
            simulation.base_sleep_ms = base_sleep_ms;
        }

        if let Some(workload) = self.workload {
            config.workload = workload;
        }
        if self.tasks.is_some() {
            config.tasks = self.tasks;
        }
        if !self.metrics.is_empty() {
            config.metrics = self.metrics;
        }
        config.json |= self.json;

        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so a JSON report on stdout stays parseable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.into_config()?;
    run(&config)
}

fn run(config: &BenchConfig) -> Result<()> {
    let tasks = config.task_count();
    let programs = config.workload.generate(tasks, &mut rand::thread_rng())?;

    tracing::info!(
        "Running {:?} x{} on {} routers / {} workers (branch {}, root branch {}, sharding {})",
        config.workload,
        tasks,
        config.simulation.routers,
        config.simulation.workers,
        config.simulation.branch,
        config.simulation.root_capacity(),
        config.simulation.sharding
    );

    let sim = Simulation::build(config.simulation.clone())?;
    let started = Instant::now();
    sim.run(programs)?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let report = Report::collect(&sim, &config.metrics, elapsed_ms);
    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
