use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persist::solution::EdgeMatrices;
use crate::reconcile::mapping::{MappingEntry, SyntheticNode};

pub type JobId = Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Tuning knobs handed to the external solver, rendered as its command line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveParams {
    pub time_limit: SignedDuration,
    pub vehicles: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for SolveParams {
    fn default() -> Self {
        SolveParams {
            time_limit: SignedDuration::from_mins(2),
            vehicles: None,
            seed: None,
        }
    }
}

impl SolveParams {
    /// Positional instance file first, then flags.
    pub fn to_args(&self, instance_file: &str) -> Vec<String> {
        let mut args = vec![
            instance_file.to_owned(),
            String::from("-t"),
            self.time_limit.as_secs().to_string(),
        ];
        if let Some(vehicles) = self.vehicles {
            args.push(String::from("-veh"));
            args.push(vehicles.to_string());
        }
        if let Some(seed) = self.seed {
            args.push(String::from("-seed"));
            args.push(seed.to_string());
        }
        args
    }
}

/// Optional per-job input data: the node mapping table, the synthetic-node
/// descriptors, and the re-optimization lineage marker.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub mapping: Vec<MappingEntry>,
    #[serde(default)]
    pub synthetic_nodes: Vec<SyntheticNode>,
    #[serde(default)]
    pub reoptimize: bool,
    pub parent_solution_id: Option<String>,
    /// Precomputed edge weights; when absent the persister falls back to the
    /// route-metrics collaborator.
    pub edge_matrices: Option<EdgeMatrices>,
}

/// What a completed job carries: the solver capture plus the persistence
/// outcome.
#[derive(Clone, Debug, Serialize)]
pub struct JobResult {
    pub solver_output: String,
    pub output_file: Option<String>,
    pub work_dir: Option<String>,
    pub solution_id: Option<String>,
}

/// A solve request and its lifecycle state. Owned exclusively by the
/// scheduler; everything handed out is a snapshot.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub instance: Arc<str>,
    pub params: SolveParams,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub progress: u8,
    /// 1-based position in the pending queue; 0 once processing.
    pub queue_position: usize,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub organization_id: Option<String>,
    pub created_by: Option<String>,
    pub input: Option<Arc<JobInput>>,
}

impl Job {
    pub fn new(request: SubmitRequest, queue_position: usize) -> Self {
        Job {
            id: Uuid::new_v4(),
            instance: request.instance,
            params: request.params,
            status: JobStatus::Pending,
            created_at: Timestamp::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            queue_position,
            result: None,
            error: None,
            organization_id: request.organization_id,
            created_by: request.created_by,
            input: request.input.map(Arc::new),
        }
    }
}

/// Everything a caller supplies when submitting a solve.
#[derive(Clone, Debug, Default)]
pub struct SubmitRequest {
    pub instance: Arc<str>,
    pub params: SolveParams,
    pub input: Option<JobInput>,
    pub organization_id: Option<String>,
    pub created_by: Option<String>,
}

impl SubmitRequest {
    pub fn new(instance: impl Into<Arc<str>>) -> Self {
        SubmitRequest {
            instance: instance.into(),
            ..SubmitRequest::default()
        }
    }
}
