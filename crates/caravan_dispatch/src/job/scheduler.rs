use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;

use super::{
    events::{JobEvent, JobEvents},
    job::{Job, JobId, JobResult, JobStatus, SubmitRequest},
};

pub type ProgressFn = dyn Fn(u8) + Send + Sync;

/// The seam between the scheduler and whatever "processing a job" means.
/// The pipeline implements this; tests substitute stubs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job, progress: &ProgressFn) -> Result<JobResult, DispatchError>;

    /// Best-effort termination of the job's in-flight work.
    fn cancel(&self, job_id: JobId) -> bool {
        let _ = job_id;
        false
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub max_queue_size: usize,
    /// Outer job timeout. Must exceed the supervisor's run timeout so the two
    /// terminal transitions never race.
    pub job_timeout: SignedDuration,
    /// How long terminal jobs stay queryable before the sweep removes them.
    pub retention: SignedDuration,
    pub sweep_interval: SignedDuration,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_queue_size: 32,
            job_timeout: SignedDuration::from_mins(6),
            retention: SignedDuration::from_mins(60),
            sweep_interval: SignedDuration::from_secs(60),
            event_capacity: 256,
        }
    }
}

struct SchedulerState {
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<JobId>,
    active: Option<JobId>,
    timeout_timer: Option<AbortHandle>,
}

impl SchedulerState {
    /// Stored positions go stale as earlier jobs finish; recompute from live
    /// queue order before handing out snapshots.
    fn refresh_positions(&mut self) {
        for (index, id) in self.queue.iter().enumerate() {
            if let Some(job) = self.jobs.get_mut(id) {
                job.queue_position = index + 1;
            }
        }
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }

    fn release_active(&mut self, job_id: JobId) {
        if self.active == Some(job_id) {
            self.active = None;
            self.disarm_timer();
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    handler: Arc<dyn JobHandler>,
    events: JobEvents,
    state: Mutex<SchedulerState>,
}

/// Strictly single-concurrency FIFO scheduler for solve jobs.
///
/// At most one job is `processing` at any time; jobs start in enqueue order.
/// The job table is the only shared mutable state in the system and it is
/// owned here; everything handed out is a snapshot. Must run inside a tokio
/// runtime (processing, timeout timers and the retention sweep are spawned
/// tasks).
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let events = JobEvents::new(config.event_capacity);
        JobScheduler {
            inner: Arc::new(SchedulerInner {
                config,
                handler,
                events,
                state: Mutex::new(SchedulerState {
                    jobs: HashMap::new(),
                    queue: VecDeque::new(),
                    active: None,
                    timeout_timer: None,
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Admits a job to the pending queue, or rejects it synchronously when
    /// the queue is at capacity (no job record is created).
    pub fn submit(&self, request: SubmitRequest) -> Result<JobId, DispatchError> {
        let job_id = {
            let mut state = self.inner.state.lock();
            if state.queue.len() >= self.inner.config.max_queue_size {
                return Err(DispatchError::QueueFull {
                    capacity: self.inner.config.max_queue_size,
                });
            }

            let job = Job::new(request, state.queue.len() + 1);
            let job_id = job.id;
            state.queue.push_back(job_id);
            state.jobs.insert(job_id, job);
            self.inner.events.publish(JobEvent::Created { job_id });
            debug!(%job_id, queued = state.queue.len(), "job admitted");
            job_id
        };

        self.dispatch_next();
        Ok(job_id)
    }

    /// Current snapshot of a job, with its queue position recomputed from
    /// live queue order.
    pub fn get(&self, job_id: JobId) -> Option<Job> {
        let mut state = self.inner.state.lock();
        state.refresh_positions();
        state.jobs.get(&job_id).cloned()
    }

    /// All known jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut state = self.inner.state.lock();
        state.refresh_positions();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.inner.state.lock().active
    }

    /// Cancels a pending job (removed from the queue) or a processing one
    /// (its process is signalled to terminate). Returns false for unknown or
    /// already-terminal jobs.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let was_processing = {
            let mut state = self.inner.state.lock();
            let Some(job) = state.jobs.get_mut(&job_id) else {
                return false;
            };
            if job.status.is_terminal() {
                return false;
            }

            let was_processing = job.status == JobStatus::Processing;
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Timestamp::now());
            job.queue_position = 0;

            if was_processing {
                state.release_active(job_id);
            } else {
                state.queue.retain(|&queued| queued != job_id);
            }
            self.inner.events.publish(JobEvent::Cancelled { job_id });
            info!(%job_id, was_processing, "job cancelled");
            was_processing
        };

        if was_processing {
            // The process gets the signal; the terminal event above is the
            // source of truth, not the handler's eventual return.
            self.inner.handler.cancel(job_id);
            self.dispatch_next();
        }
        true
    }

    /// External failure report; also what the job timeout timer fires.
    /// Normalizes the job into `failed` and, if it was running, terminates
    /// its process.
    pub fn fail(&self, job_id: JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        let was_processing = {
            let mut state = self.inner.state.lock();
            let Some(job) = state.jobs.get_mut(&job_id) else {
                return false;
            };
            if job.status.is_terminal() {
                return false;
            }

            let was_processing = job.status == JobStatus::Processing;
            job.status = JobStatus::Failed;
            job.error = Some(message.clone());
            job.completed_at = Some(Timestamp::now());
            job.queue_position = 0;

            if was_processing {
                state.release_active(job_id);
            } else {
                state.queue.retain(|&queued| queued != job_id);
            }
            self.inner.events.publish(JobEvent::Failed {
                job_id,
                error: message.clone(),
            });
            warn!(%job_id, %message, "job failed");
            was_processing
        };

        if was_processing {
            self.inner.handler.cancel(job_id);
            self.dispatch_next();
        }
        true
    }

    /// Progress is only meaningful while processing.
    pub fn update_progress(&self, job_id: JobId, progress: u8) -> bool {
        let mut state = self.inner.state.lock();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.progress = progress.min(100);
                self.inner.events.publish(JobEvent::Progress {
                    job_id,
                    progress: job.progress,
                });
                true
            }
            _ => false,
        }
    }

    /// Removes terminal jobs whose completion is older than the retention
    /// window. Pending and processing jobs are never touched.
    pub fn sweep_expired(&self) -> usize {
        let now = Timestamp::now();
        let retention = self.inner.config.retention;
        let mut state = self.inner.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            if !job.status.is_terminal() {
                return true;
            }
            match job.completed_at {
                Some(done) => now.duration_since(done) < retention,
                None => true,
            }
        });
        before - state.jobs.len()
    }

    /// Periodic garbage collection of old terminal jobs.
    pub fn spawn_retention_sweep(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let period = std::time::Duration::try_from(self.inner.config.sweep_interval)
            .unwrap_or(std::time::Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = scheduler.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired jobs");
                }
            }
        })
    }

    /// Starts the next pending job if the scheduler is idle.
    fn dispatch_next(&self) {
        loop {
            let snapshot = {
                let mut state = self.inner.state.lock();
                if state.active.is_some() {
                    return;
                }
                let Some(job_id) = state.queue.pop_front() else {
                    return;
                };
                let Some(job) = state.jobs.get_mut(&job_id) else {
                    continue;
                };
                if job.status != JobStatus::Pending {
                    continue;
                }

                job.status = JobStatus::Processing;
                job.started_at = Some(Timestamp::now());
                job.queue_position = 0;
                state.active = Some(job_id);

                let timeout = self.inner.config.job_timeout;
                let scheduler = self.clone();
                let timer = tokio::spawn(async move {
                    let sleep = std::time::Duration::try_from(timeout)
                        .unwrap_or(std::time::Duration::MAX);
                    tokio::time::sleep(sleep).await;
                    scheduler.fail(job_id, format!("job timed out after {timeout:#}"));
                });
                state.timeout_timer = Some(timer.abort_handle());

                self.inner.events.publish(JobEvent::Started { job_id });
                info!(%job_id, "job started");
                state.jobs.get(&job_id).cloned()
            };

            let Some(snapshot) = snapshot else { continue };
            let scheduler = self.clone();
            let handler = Arc::clone(&self.inner.handler);
            tokio::spawn(async move {
                let job_id = snapshot.id;
                let progress_scheduler = scheduler.clone();
                let progress = move |progress: u8| {
                    progress_scheduler.update_progress(job_id, progress);
                };
                let result = handler.handle(snapshot, &progress).await;
                scheduler.finish(job_id, result);
            });
            return;
        }
    }

    /// Terminal transition driven by the handler's return. If the job was
    /// already cancelled or timed out, the result is discarded; the earlier
    /// terminal event stands.
    fn finish(&self, job_id: JobId, result: Result<JobResult, DispatchError>) {
        {
            let mut state = self.inner.state.lock();
            state.release_active(job_id);

            if let Some(job) = state.jobs.get_mut(&job_id) {
                if !job.status.is_terminal() {
                    job.completed_at = Some(Timestamp::now());
                    job.queue_position = 0;
                    match result {
                        Ok(job_result) => {
                            job.status = JobStatus::Completed;
                            job.progress = 100;
                            job.result = Some(job_result);
                            self.inner.events.publish(JobEvent::Completed { job_id });
                            info!(%job_id, "job completed");
                        }
                        Err(error) if error.is_cancellation() => {
                            job.status = JobStatus::Cancelled;
                            self.inner.events.publish(JobEvent::Cancelled { job_id });
                            info!(%job_id, "job cancelled by its handler");
                        }
                        Err(error) => {
                            let message = error.to_string();
                            job.status = JobStatus::Failed;
                            job.error = Some(message.clone());
                            self.inner.events.publish(JobEvent::Failed {
                                job_id,
                                error: message.clone(),
                            });
                            warn!(%job_id, %message, "job failed");
                        }
                    }
                }
            }
        }

        self.dispatch_next();
    }
}
