use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use caravan_dispatch::job::job::{JobInput, JobStatus, SolveParams, SubmitRequest};
use caravan_dispatch::job::scheduler::{JobScheduler, SchedulerConfig};
use caravan_dispatch::persist::memory::InMemorySolutionStore;
use caravan_dispatch::persist::metrics::HaversineMetrics;
use caravan_dispatch::persist::persister::LineagePersister;
use caravan_dispatch::pipeline::{PipelineConfig, SolvePipeline, TempWorkspace};
use caravan_dispatch::solver::supervisor::ProcessSupervisor;

mod parsers;

#[derive(Parser)]
#[clap(author, version, about = "Submit a solve job and poll it to completion", long_about = None)]
struct Cli {
    /// Solver instance file (solver-specific textual format).
    instance: PathBuf,

    /// Input-data JSON: mapping table, synthetic nodes, re-optimization flag.
    #[arg(short, long)]
    input_data: Option<PathBuf>,

    /// Solver binary candidates, first existing one wins.
    #[arg(short, long)]
    solver: Vec<PathBuf>,

    /// Solver time limit (e.g., "30s", "5m", "PT1H30M").
    #[arg(short, long, default_value = "2m", value_parser = parsers::parse_duration)]
    time_limit: jiff::SignedDuration,

    /// Hard wall-clock limit for the solver process.
    #[arg(long, default_value = "5m", value_parser = parsers::parse_duration)]
    solver_timeout: jiff::SignedDuration,

    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::from_filename("./.env.local").ok();

    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let instance = std::fs::read_to_string(&cli.instance)
        .with_context(|| format!("reading instance {}", cli.instance.display()))?;

    let input: Option<JobInput> = match &cli.input_data {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("reading input data {}", path.display()))?;
            Some(serde_json::from_reader(file).context("parsing input data")?)
        }
        None => None,
    };

    let store = Arc::new(InMemorySolutionStore::new());
    let pipeline = SolvePipeline::new(
        PipelineConfig {
            executable_candidates: if cli.solver.is_empty() {
                PipelineConfig::default().executable_candidates
            } else {
                cli.solver.clone()
            },
            solver_timeout: cli.solver_timeout,
        },
        Arc::new(ProcessSupervisor::new()),
        Arc::new(TempWorkspace::default()),
        LineagePersister::new(store.clone(), Arc::new(HaversineMetrics::default())),
    );

    let scheduler = JobScheduler::new(SchedulerConfig::default(), Arc::new(pipeline));
    scheduler.spawn_retention_sweep();

    let mut request = SubmitRequest::new(instance);
    request.params = SolveParams {
        time_limit: cli.time_limit,
        ..SolveParams::default()
    };
    request.input = input;

    let job_id = scheduler.submit(request)?;
    info!(%job_id, "job submitted");

    let job = loop {
        let job = scheduler
            .get(job_id)
            .ok_or(caravan_dispatch::error::DispatchError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    match job.status {
        JobStatus::Completed => {
            let result = job.result.context("completed job without result")?;
            info!(elapsed = ?job.completed_at.zip(job.started_at).map(|(done, start)| done - start), "job completed");
            if let Some(solution_id) = &result.solution_id {
                let payload = store
                    .get(solution_id)
                    .context("persisted solution not found")?;
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{}", result.solver_output);
            }
            Ok(())
        }
        JobStatus::Cancelled => anyhow::bail!("job was cancelled"),
        _ => anyhow::bail!(
            "job failed: {}",
            job.error.unwrap_or_else(|| String::from("unknown error"))
        ),
    }
}
