use std::{collections::HashMap, path::Path, process::Stdio, time::Instant};

use jiff::SignedDuration;
use parking_lot::Mutex;
use tokio::{io::AsyncReadExt, process::Command, sync::watch, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DispatchError;

/// Captured output and timing of a solver process that ran to exit.
#[derive(Debug)]
pub struct SolverRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: SignedDuration,
}

/// How a supervised run ended. Timeout and cancellation are distinct from a
/// non-zero exit code; in both cases the process was forcibly terminated and
/// whatever output it produced so far is kept for context.
#[derive(Debug)]
pub enum RunOutcome {
    Finished(SolverRun),
    TimedOut {
        stdout: String,
        stderr: String,
        elapsed: SignedDuration,
    },
    Cancelled {
        stdout: String,
        stderr: String,
        elapsed: SignedDuration,
    },
}

/// Launches the external solver binary and supervises it: full stdout/stderr
/// capture, a hard wall-clock timeout, and a per-job cancellation handle that
/// terminates the in-flight process.
///
/// The process handle is scoped to the `run` call and reaped on every exit
/// path; a cancel after the process exited is a no-op.
#[derive(Default)]
pub struct ProcessSupervisor {
    active: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(
        &self,
        job_id: Uuid,
        executable: &Path,
        args: &[String],
        work_dir: &Path,
        timeout: SignedDuration,
    ) -> Result<RunOutcome, DispatchError> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.lock().insert(job_id, cancel_tx);

        let outcome = run_child(executable, args, work_dir, timeout, cancel_rx).await;

        self.active.lock().remove(&job_id);
        outcome
    }

    /// Signals termination of the job's in-flight process. Returns whether a
    /// process was there to signal; cancelling an already-exited job is a
    /// no-op.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.active.lock().get(&job_id) {
            Some(cancel_tx) => cancel_tx.send(true).is_ok(),
            None => false,
        }
    }
}

enum ChildExit {
    Status(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

async fn run_child(
    executable: &Path,
    args: &[String],
    work_dir: &Path,
    timeout: SignedDuration,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<RunOutcome, DispatchError> {
    let started = Instant::now();

    let mut child = Command::new(executable)
        .args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| {
            DispatchError::Process(format!(
                "failed to launch solver {}: {error}",
                executable.display()
            ))
        })?;

    // Drain both pipes concurrently so the child can never block on a full
    // pipe while we wait on it.
    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let deadline = tokio::time::sleep(
        std::time::Duration::try_from(timeout).unwrap_or(std::time::Duration::MAX),
    );
    tokio::pin!(deadline);

    let exit = tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|error| {
                DispatchError::Process(format!("failed to wait on solver process: {error}"))
            })?;
            ChildExit::Status(status)
        }
        _ = &mut deadline => ChildExit::TimedOut,
        _ = cancel_rx.changed() => ChildExit::Cancelled,
    };

    let forced = !matches!(exit, ChildExit::Status(_));
    if forced {
        if let Err(error) = child.start_kill() {
            warn!(%error, "failed to kill solver process");
        }
        // Reap it so no zombie outlives the job.
        let _ = child.wait().await;
    }

    // After a kill, orphaned grandchildren may still hold the pipe write
    // ends open; the drains must not wait for them.
    let (stdout, stderr) = if forced {
        let grace = std::time::Duration::from_millis(500);
        (
            collect_within(stdout_task, grace).await,
            collect_within(stderr_task, grace).await,
        )
    } else {
        (
            stdout_task.await.unwrap_or_default(),
            stderr_task.await.unwrap_or_default(),
        )
    };
    let elapsed = SignedDuration::try_from(started.elapsed()).unwrap_or(SignedDuration::MAX);

    match exit {
        ChildExit::Status(status) => {
            debug!(code = ?status.code(), ?elapsed, "solver process exited");
            Ok(RunOutcome::Finished(SolverRun {
                exit_code: status.code(),
                stdout,
                stderr,
                elapsed,
            }))
        }
        ChildExit::TimedOut => Ok(RunOutcome::TimedOut {
            stdout,
            stderr,
            elapsed,
        }),
        ChildExit::Cancelled => Ok(RunOutcome::Cancelled {
            stdout,
            stderr,
            elapsed,
        }),
    }
}

async fn collect_within(mut task: JoinHandle<String>, grace: std::time::Duration) -> String {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn drain(reader: Option<impl AsyncReadExt + Unpin + Send + 'static>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buffer).await;
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}
