use tokio::sync::broadcast;

use super::job::JobId;

/// Lifecycle transitions published by the scheduler. Consumers subscribe and
/// react; the scheduler never knows what processing a job concretely entails.
#[derive(Clone, Debug)]
pub enum JobEvent {
    Created { job_id: JobId },
    Started { job_id: JobId },
    Progress { job_id: JobId, progress: u8 },
    Completed { job_id: JobId },
    Failed { job_id: JobId, error: String },
    Cancelled { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Created { job_id }
            | JobEvent::Started { job_id }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => *job_id,
        }
    }
}

pub struct JobEvents {
    tx: broadcast::Sender<JobEvent>,
}

impl JobEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        JobEvents { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is fine; events are advisory.
    pub(crate) fn publish(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }
}
