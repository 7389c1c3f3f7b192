use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jiff::SignedDuration;
use parking_lot::Mutex;
use tokio::sync::Notify;

use caravan_dispatch::error::DispatchError;
use caravan_dispatch::job::events::JobEvent;
use caravan_dispatch::job::job::{Job, JobId, JobResult, JobStatus, SubmitRequest};
use caravan_dispatch::job::scheduler::{JobHandler, JobScheduler, ProgressFn, SchedulerConfig};

fn dummy_result() -> JobResult {
    JobResult {
        solver_output: String::from("Route 1 : 0 1 0"),
        output_file: None,
        work_dir: None,
        solution_id: None,
    }
}

/// Completes after a short sleep; counts invocations.
struct QuickHandler {
    invocations: AtomicUsize,
}

impl QuickHandler {
    fn new() -> Self {
        QuickHandler {
            invocations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobHandler for QuickHandler {
    async fn handle(&self, _job: Job, progress: &ProgressFn) -> Result<JobResult, DispatchError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        progress(50);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(dummy_result())
    }
}

/// Sleeps for a long time unless cancelled through the handler seam.
struct SlowHandler {
    notifiers: Mutex<HashMap<JobId, Arc<Notify>>>,
}

impl SlowHandler {
    fn new() -> Self {
        SlowHandler {
            notifiers: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn handle(&self, job: Job, _progress: &ProgressFn) -> Result<JobResult, DispatchError> {
        let notify = Arc::new(Notify::new());
        self.notifiers.lock().insert(job.id, Arc::clone(&notify));

        let outcome = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(dummy_result()),
            _ = notify.notified() => Err(DispatchError::Cancelled),
        };

        self.notifiers.lock().remove(&job.id);
        outcome
    }

    fn cancel(&self, job_id: JobId) -> bool {
        match self.notifiers.lock().get(&job_id) {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}

async fn wait_until<F>(mut predicate: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

fn quick_scheduler() -> (JobScheduler, Arc<QuickHandler>) {
    let handler = Arc::new(QuickHandler::new());
    let scheduler = JobScheduler::new(SchedulerConfig::default(), handler.clone());
    (scheduler, handler)
}

#[tokio::test]
async fn jobs_run_in_fifo_order_one_at_a_time() {
    let (scheduler, _) = quick_scheduler();
    let mut events = scheduler.subscribe();

    let ids: Vec<JobId> = (0..3)
        .map(|_| scheduler.submit(SubmitRequest::new("instance")).unwrap())
        .collect();

    wait_until(|| {
        ids.iter()
            .all(|&id| scheduler.get(id).unwrap().status == JobStatus::Completed)
    })
    .await;

    let mut started_order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let JobEvent::Started { job_id } = event {
            started_order.push(job_id);
        }
    }
    assert_eq!(started_order, ids, "start order must match enqueue order");
}

#[tokio::test]
async fn never_more_than_one_processing() {
    let (scheduler, handler) = quick_scheduler();

    // Submissions race in from separate tasks.
    let submitters: Vec<_> = (0..5)
        .map(|_| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.submit(SubmitRequest::new("instance")).unwrap() })
        })
        .collect();
    for submitter in submitters {
        submitter.await.unwrap();
    }

    for _ in 0..50 {
        let processing = scheduler
            .list()
            .iter()
            .filter(|job| job.status == JobStatus::Processing)
            .count();
        assert!(processing <= 1, "observed {processing} processing jobs");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    wait_until(|| handler.invocations.load(Ordering::SeqCst) == 5).await;
}

#[tokio::test]
async fn full_queue_rejects_submission() {
    let handler = Arc::new(SlowHandler::new());
    let config = SchedulerConfig {
        max_queue_size: 1,
        ..SchedulerConfig::default()
    };
    let scheduler = JobScheduler::new(config, handler);

    let first = scheduler.submit(SubmitRequest::new("a")).unwrap();
    wait_until(|| scheduler.get(first).unwrap().status == JobStatus::Processing).await;

    // One job pending fills the queue.
    scheduler.submit(SubmitRequest::new("b")).unwrap();
    let err = scheduler.submit(SubmitRequest::new("c")).unwrap_err();
    assert!(matches!(err, DispatchError::QueueFull { capacity: 1 }));
    assert_eq!(scheduler.list().len(), 2, "rejected job left no record");
}

#[tokio::test]
async fn queue_positions_recompute_after_cancel() {
    let handler = Arc::new(SlowHandler::new());
    let scheduler = JobScheduler::new(SchedulerConfig::default(), handler);

    let active = scheduler.submit(SubmitRequest::new("active")).unwrap();
    wait_until(|| scheduler.get(active).unwrap().status == JobStatus::Processing).await;
    assert_eq!(scheduler.get(active).unwrap().queue_position, 0);

    let p1 = scheduler.submit(SubmitRequest::new("p1")).unwrap();
    let p2 = scheduler.submit(SubmitRequest::new("p2")).unwrap();
    let p3 = scheduler.submit(SubmitRequest::new("p3")).unwrap();

    assert_eq!(scheduler.get(p1).unwrap().queue_position, 1);
    assert_eq!(scheduler.get(p2).unwrap().queue_position, 2);
    assert_eq!(scheduler.get(p3).unwrap().queue_position, 3);

    assert!(scheduler.cancel(p2));
    let cancelled = scheduler.get(p2).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.queue_position, 0);

    // Relative order of the survivors is untouched.
    assert_eq!(scheduler.get(p1).unwrap().queue_position, 1);
    assert_eq!(scheduler.get(p3).unwrap().queue_position, 2);
}

#[tokio::test]
async fn cancelling_processing_job_frees_the_scheduler() {
    let handler = Arc::new(SlowHandler::new());
    let scheduler = JobScheduler::new(SchedulerConfig::default(), handler);

    let first = scheduler.submit(SubmitRequest::new("a")).unwrap();
    let second = scheduler.submit(SubmitRequest::new("b")).unwrap();
    wait_until(|| scheduler.get(first).unwrap().status == JobStatus::Processing).await;

    assert!(scheduler.cancel(first));
    assert_eq!(scheduler.get(first).unwrap().status, JobStatus::Cancelled);

    wait_until(|| scheduler.get(second).unwrap().status == JobStatus::Processing).await;

    // Cancelling a terminal job is a no-op.
    assert!(!scheduler.cancel(first));
}

#[tokio::test]
async fn job_timeout_fails_with_timeout_message() {
    let handler = Arc::new(SlowHandler::new());
    let config = SchedulerConfig {
        job_timeout: SignedDuration::from_millis(100),
        ..SchedulerConfig::default()
    };
    let scheduler = JobScheduler::new(config, handler.clone());

    let job_id = scheduler.submit(SubmitRequest::new("a")).unwrap();
    wait_until(|| scheduler.get(job_id).unwrap().status == JobStatus::Failed).await;

    let job = scheduler.get(job_id).unwrap();
    assert!(job.error.as_deref().unwrap().contains("timed out"));
    assert!(job.result.is_none());
    // The in-flight work got the termination signal.
    wait_until(|| handler.notifiers.lock().is_empty()).await;
}

#[tokio::test]
async fn sweep_removes_only_old_terminal_jobs() {
    let handler = Arc::new(SlowHandler::new());
    let config = SchedulerConfig {
        retention: SignedDuration::ZERO,
        ..SchedulerConfig::default()
    };
    let scheduler = JobScheduler::new(config, handler);

    let done = scheduler.submit(SubmitRequest::new("done")).unwrap();
    wait_until(|| scheduler.get(done).unwrap().status == JobStatus::Processing).await;
    scheduler.cancel(done);

    let running = scheduler.submit(SubmitRequest::new("running")).unwrap();
    wait_until(|| scheduler.get(running).unwrap().status == JobStatus::Processing).await;
    let pending = scheduler.submit(SubmitRequest::new("pending")).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let removed = scheduler.sweep_expired();
    assert_eq!(removed, 1);
    assert!(scheduler.get(done).is_none());
    assert!(scheduler.get(running).is_some());
    assert!(scheduler.get(pending).is_some());
}

#[tokio::test]
async fn sweep_keeps_jobs_inside_the_retention_window() {
    let (scheduler, _) = quick_scheduler();
    let done = scheduler.submit(SubmitRequest::new("done")).unwrap();
    wait_until(|| scheduler.get(done).unwrap().status == JobStatus::Completed).await;

    // Default retention is an hour; a just-finished job must survive.
    assert_eq!(scheduler.sweep_expired(), 0);
    assert!(scheduler.get(done).is_some());
}

#[tokio::test]
async fn terminal_jobs_have_result_xor_error() {
    let (scheduler, _) = quick_scheduler();
    let ok = scheduler.submit(SubmitRequest::new("ok")).unwrap();
    wait_until(|| scheduler.get(ok).unwrap().status == JobStatus::Completed).await;

    let job = scheduler.get(ok).unwrap();
    assert!(job.result.is_some());
    assert!(job.error.is_none());
    assert_eq!(job.progress, 100);

    struct FailingHandler;
    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _job: Job, _p: &ProgressFn) -> Result<JobResult, DispatchError> {
            Err(DispatchError::Validation(String::from("bad instance")))
        }
    }

    let scheduler = JobScheduler::new(SchedulerConfig::default(), Arc::new(FailingHandler));
    let bad = scheduler.submit(SubmitRequest::new("bad")).unwrap();
    wait_until(|| scheduler.get(bad).unwrap().status == JobStatus::Failed).await;

    let job = scheduler.get(bad).unwrap();
    assert!(job.result.is_none());
    assert_eq!(job.error.as_deref(), Some("validation failed: bad instance"));
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let (scheduler, _) = quick_scheduler();
    let mut events = scheduler.subscribe();

    let job_id = scheduler.submit(SubmitRequest::new("evt")).unwrap();
    wait_until(|| scheduler.get(job_id).unwrap().status == JobStatus::Completed).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == job_id {
            kinds.push(match event {
                JobEvent::Created { .. } => "created",
                JobEvent::Started { .. } => "started",
                JobEvent::Progress { .. } => "progress",
                JobEvent::Completed { .. } => "completed",
                JobEvent::Failed { .. } => "failed",
                JobEvent::Cancelled { .. } => "cancelled",
            });
        }
    }

    assert_eq!(kinds.first(), Some(&"created"));
    assert_eq!(kinds.get(1), Some(&"started"));
    assert_eq!(kinds.last(), Some(&"completed"));
}
