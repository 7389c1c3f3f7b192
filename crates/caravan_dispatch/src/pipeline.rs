use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::SignedDuration;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::job::job::{Job, JobId, JobResult};
use crate::job::scheduler::{JobHandler, ProgressFn};
use crate::persist::persister::{LineagePersister, validate_mapping};
use crate::persist::solution::TotalsInput;
use crate::reconcile::reconciler::{compact, reconcile};
use crate::solver::executable::resolve_executable;
use crate::solver::output_parser::{parse_cost, parse_solver_output};
use crate::solver::supervisor::{ProcessSupervisor, RunOutcome};

/// A working directory prepared for one solver run.
#[derive(Clone, Debug)]
pub struct PreparedWorkspace {
    pub dir: PathBuf,
    /// Instance filename within `dir`, handed to the solver as its first
    /// argument.
    pub instance_file: String,
    pub output_file: Option<String>,
}

/// Collaborator that prepares and tears down solver working directories.
#[async_trait]
pub trait SolverWorkspace: Send + Sync {
    async fn prepare(&self, job: &Job) -> Result<PreparedWorkspace, anyhow::Error>;
    async fn teardown(&self, workspace: &PreparedWorkspace) -> Result<(), anyhow::Error>;
}

/// Default workspace collaborator: one subdirectory per job under a root,
/// removed after the run.
pub struct TempWorkspace {
    root: PathBuf,
}

impl TempWorkspace {
    pub fn new(root: PathBuf) -> Self {
        TempWorkspace { root }
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        TempWorkspace::new(std::env::temp_dir().join("caravan"))
    }
}

#[async_trait]
impl SolverWorkspace for TempWorkspace {
    async fn prepare(&self, job: &Job) -> Result<PreparedWorkspace, anyhow::Error> {
        let dir = self.root.join(job.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("instance.vrp"), job.instance.as_bytes()).await?;

        Ok(PreparedWorkspace {
            dir,
            instance_file: String::from("instance.vrp"),
            output_file: Some(String::from("solution.sol")),
        })
    }

    async fn teardown(&self, workspace: &PreparedWorkspace) -> Result<(), anyhow::Error> {
        tokio::fs::remove_dir_all(&workspace.dir).await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Priority-ordered solver binary candidates; first existing one wins.
    pub executable_candidates: Vec<PathBuf>,
    /// Hard wall-clock limit for one solver run. The scheduler's job timeout
    /// must exceed this.
    pub solver_timeout: SignedDuration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            executable_candidates: vec![
                PathBuf::from("./solver/pdp_solver"),
                PathBuf::from("/usr/local/bin/pdp_solver"),
            ],
            solver_timeout: SignedDuration::from_mins(5),
        }
    }
}

/// The job handler behind the scheduler: supervises the solver process,
/// parses its output, reconciles virtual nodes on re-optimizations, and
/// persists the solution lineage.
pub struct SolvePipeline {
    config: PipelineConfig,
    supervisor: Arc<ProcessSupervisor>,
    workspace: Arc<dyn SolverWorkspace>,
    persister: LineagePersister,
}

impl SolvePipeline {
    pub fn new(
        config: PipelineConfig,
        supervisor: Arc<ProcessSupervisor>,
        workspace: Arc<dyn SolverWorkspace>,
        persister: LineagePersister,
    ) -> Self {
        SolvePipeline {
            config,
            supervisor,
            workspace,
            persister,
        }
    }

    async fn execute(
        &self,
        job: &Job,
        workspace: &PreparedWorkspace,
        progress: &ProgressFn,
    ) -> Result<JobResult, DispatchError> {
        // Input validation happens before the solver is ever launched.
        let Some(input) = job.input.as_deref() else {
            return Err(DispatchError::Validation(String::from(
                "job carries no input data (mapping table required)",
            )));
        };
        validate_mapping(&input.mapping)?;

        progress(5);
        let executable = resolve_executable(&self.config.executable_candidates)?;
        let args = job.params.to_args(&workspace.instance_file);

        let outcome = self
            .supervisor
            .run(
                job.id,
                &executable,
                &args,
                &workspace.dir,
                self.config.solver_timeout,
            )
            .await?;

        let run = match outcome {
            RunOutcome::Finished(run) if run.exit_code == Some(0) => run,
            RunOutcome::Finished(run) => {
                return Err(DispatchError::Process(format!(
                    "solver exited with code {:?}: {}",
                    run.exit_code,
                    failure_context(&run.stdout, &run.stderr)
                )));
            }
            RunOutcome::TimedOut { elapsed, .. } => {
                debug!(?elapsed, "solver run hit its wall-clock limit");
                return Err(DispatchError::Timeout(self.config.solver_timeout));
            }
            RunOutcome::Cancelled { .. } => return Err(DispatchError::Cancelled),
        };
        progress(60);

        let raw_routes = parse_solver_output(&run.stdout);
        if raw_routes.is_empty() {
            return Err(DispatchError::Process(String::from(
                "solver produced no parsable routes",
            )));
        }

        // Stage 1 always runs: it validates every node index and builds the
        // real-stop lists; on a from-scratch solve it is an identity pass.
        let synthetic: &[_] = if input.reoptimize {
            &input.synthetic_nodes
        } else {
            &[]
        };
        let stripped = reconcile(&raw_routes, &input.mapping, synthetic)?;

        let (routes, mapping) = if input.reoptimize {
            let compacted = compact(&input.mapping, stripped.routes)?;
            (compacted.routes, compacted.mapping)
        } else {
            (stripped.routes, input.mapping.clone())
        };
        progress(85);

        let totals_input = TotalsInput {
            cost: parse_cost(&run.stdout),
            matrices: input.edge_matrices.clone(),
            raw_output: run.stdout.clone(),
            reoptimized: input.reoptimize,
        };
        let solution_id = self
            .persister
            .persist(
                &routes,
                &mapping,
                totals_input,
                input.parent_solution_id.as_deref(),
            )
            .await?;
        progress(100);

        Ok(JobResult {
            solver_output: run.stdout,
            output_file: workspace.output_file.clone(),
            work_dir: Some(workspace.dir.display().to_string()),
            solution_id: Some(solution_id),
        })
    }
}

#[async_trait]
impl JobHandler for SolvePipeline {
    async fn handle(&self, job: Job, progress: &ProgressFn) -> Result<JobResult, DispatchError> {
        let workspace = self
            .workspace
            .prepare(&job)
            .await
            .map_err(|error| DispatchError::Process(format!("workspace setup failed: {error}")))?;

        let result = self.execute(&job, &workspace, progress).await;

        if let Err(error) = self.workspace.teardown(&workspace).await {
            warn!(job_id = %job.id, %error, "workspace teardown failed");
        }

        result
    }

    fn cancel(&self, job_id: JobId) -> bool {
        self.supervisor.cancel(job_id)
    }
}

fn failure_context(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    let snippet: String = source.trim().chars().take(400).collect();
    if snippet.is_empty() {
        String::from("no output captured")
    } else {
        snippet
    }
}
