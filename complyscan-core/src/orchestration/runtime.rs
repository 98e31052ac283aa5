//! Supervised worker pool executing scan pipelines in the background.
//!
//! Submissions land on a bounded mpsc queue shared by `worker_count` workers.
//! Each pipeline runs in its own task so a panic is contained; errors and
//! panics are reported on a separate failure channel drained by a supervisor
//! task, which hands the job back to the executor to be marked failed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use complyscan_model::ScanJob;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScanError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Work executed by the runtime for each submitted job.
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    /// Run the job to a terminal state. An `Err` is reported to the
    /// supervisor, which calls [`ScanExecutor::abandon`].
    async fn execute(&self, job: ScanJob) -> Result<()>;

    /// Give up on a job that errored, panicked or was never started.
    async fn abandon(&self, job: &ScanJob, reason: &str);
}

#[derive(Debug)]
struct WorkerFailure {
    worker: usize,
    job: ScanJob,
    reason: String,
}

pub struct ScanRuntime {
    executor: Arc<dyn ScanExecutor>,
    submit_tx: Mutex<Option<mpsc::Sender<ScanJob>>>,
    queue_rx: Arc<Mutex<mpsc::Receiver<ScanJob>>>,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    worker_count: usize,
}

impl fmt::Debug for ScanRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accepting = self
            .submit_tx
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("ScanRuntime")
            .field("worker_count", &self.worker_count)
            .field("accepting", &accepting)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ScanRuntime {
    /// Spawn the workers and the supervisor. Must be called from within a
    /// tokio runtime.
    pub fn start(
        executor: Arc<dyn ScanExecutor>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (submit_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let shutdown_token = CancellationToken::new();

        let handles = (0..worker_count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&executor),
                    Arc::clone(&queue_rx),
                    failure_tx.clone(),
                    shutdown_token.clone(),
                ))
            })
            .collect();
        // Workers own the only senders; the supervisor stops once they exit.
        drop(failure_tx);
        let supervisor =
            tokio::spawn(supervise(Arc::clone(&executor), failure_rx));

        info!(
            target: "scan::runtime",
            workers = worker_count,
            queue_capacity,
            "scan runtime started"
        );

        Self {
            executor,
            submit_tx: Mutex::new(Some(submit_tx)),
            queue_rx,
            shutdown_token,
            worker_handles: Mutex::new(handles),
            supervisor: Mutex::new(Some(supervisor)),
            worker_count,
        }
    }

    /// Queue a job without waiting for a worker.
    pub async fn submit(&self, job: ScanJob) -> Result<()> {
        let guard = self.submit_tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| {
            ScanError::Internal("scan runtime is shut down".to_string())
        })?;
        tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) => ScanError::Internal(format!(
                "scan queue is full, job {} rejected",
                job.id
            )),
            mpsc::error::TrySendError::Closed(job) => ScanError::Internal(
                format!("scan runtime is shut down, job {} rejected", job.id),
            ),
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Stop accepting work, let in-flight pipelines finish and abandon
    /// whatever is still queued.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Ok(());
        }
        info!(target: "scan::runtime", "shutting down scan runtime");
        self.shutdown_token.cancel();
        self.submit_tx.lock().await.take();

        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: "scan::runtime", error = %err, "worker task failed")
                }
                Err(_) => warn!(
                    target: "scan::runtime",
                    "worker did not stop within the grace period"
                ),
            }
        }

        let mut queued = Vec::new();
        {
            let mut rx = self.queue_rx.lock().await;
            rx.close();
            while let Ok(job) = rx.try_recv() {
                queued.push(job);
            }
        }
        for job in &queued {
            self.executor.abandon(job, "scan runtime shut down").await;
        }
        if !queued.is_empty() {
            warn!(
                target: "scan::runtime",
                abandoned = queued.len(),
                "queued scans abandoned at shutdown"
            );
        }

        if let Some(supervisor) = self.supervisor.lock().await.take()
            && let Err(err) = supervisor.await
        {
            warn!(target: "scan::runtime", error = %err, "supervisor task failed");
        }
        info!(target: "scan::runtime", "scan runtime shut down");
        Ok(())
    }
}

async fn run_worker(
    worker: usize,
    executor: Arc<dyn ScanExecutor>,
    queue: Arc<Mutex<mpsc::Receiver<ScanJob>>>,
    failures: mpsc::UnboundedSender<WorkerFailure>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            job = async { queue.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            debug!(target: "scan::runtime", worker, "worker stopping");
            break;
        };

        debug!(
            target: "scan::runtime",
            worker,
            scan = %job.id,
            tenant = %job.tenant_id,
            "worker picked up scan"
        );

        let task = tokio::spawn({
            let executor = Arc::clone(&executor);
            let job = job.clone();
            async move { executor.execute(job).await }
        });
        let reason = match task.await {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(join) if join.is_panic() => format!("scan pipeline panicked: {join}"),
            Err(join) => format!("scan pipeline aborted: {join}"),
        };
        if failures
            .send(WorkerFailure { worker, job, reason })
            .is_err()
        {
            error!(target: "scan::runtime", worker, "failure channel closed");
        }
    }
}

async fn supervise(
    executor: Arc<dyn ScanExecutor>,
    mut failures: mpsc::UnboundedReceiver<WorkerFailure>,
) {
    while let Some(failure) = failures.recv().await {
        error!(
            target: "scan::runtime",
            worker = failure.worker,
            scan = %failure.job.id,
            tenant = %failure.job.tenant_id,
            reason = %failure.reason,
            "scan pipeline failed"
        );
        executor.abandon(&failure.job, &failure.reason).await;
    }
    debug!(target: "scan::runtime", "supervisor stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use complyscan_model::{
        Framework, ScanId, ScanProgress, ScanSettings, ScanStatus, ScanType,
        TenantId,
    };
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn job(account: &str) -> ScanJob {
        let now = Utc::now();
        ScanJob {
            id: ScanId::new(),
            tenant_id: TenantId::new("t"),
            scan_type: ScanType::Full,
            status: ScanStatus::Initializing,
            account_id: account.into(),
            regions: vec![],
            services: vec![],
            frameworks: vec![Framework::Soc2],
            progress: ScanProgress::default(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            results: None,
            settings: ScanSettings::default(),
            requested_by: "tester".into(),
            request_id: None,
        }
    }

    /// Behaviour keyed by the job's account id: "ok", "err" or "panic".
    #[derive(Default)]
    struct RecordingExecutor {
        executed: StdMutex<Vec<ScanId>>,
        abandoned: StdMutex<Vec<(ScanId, String)>>,
        done: Notify,
    }

    #[async_trait]
    impl ScanExecutor for RecordingExecutor {
        async fn execute(&self, job: ScanJob) -> Result<()> {
            self.executed.lock().unwrap().push(job.id);
            let outcome = match job.account_id.as_str() {
                "err" => Err(ScanError::Evaluation("rules exploded".into())),
                "panic" => panic!("pipeline bug"),
                _ => Ok(()),
            };
            self.done.notify_one();
            outcome
        }

        async fn abandon(&self, job: &ScanJob, reason: &str) {
            self.abandoned
                .lock()
                .unwrap()
                .push((job.id, reason.to_string()));
            self.done.notify_one();
        }
    }

    async fn wait_for(executor: &RecordingExecutor, abandoned: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while executor.abandoned.lock().unwrap().len() < abandoned {
                executor.done.notified().await;
            }
        })
        .await
        .expect("supervisor reported failures");
    }

    #[tokio::test]
    async fn errors_and_panics_reach_the_supervisor() -> Result<()> {
        let executor = Arc::new(RecordingExecutor::default());
        let runtime = ScanRuntime::start(executor.clone(), 2, 8);

        let ok = job("ok");
        let failing = job("err");
        let panicking = job("panic");
        runtime.submit(ok.clone()).await?;
        runtime.submit(failing.clone()).await?;
        runtime.submit(panicking.clone()).await?;

        wait_for(&executor, 2).await;
        runtime.shutdown().await?;

        let abandoned = executor.abandoned.lock().unwrap().clone();
        assert_eq!(abandoned.len(), 2);
        assert!(abandoned.iter().any(|(id, r)| *id == failing.id && r.contains("rules exploded")));
        assert!(abandoned.iter().any(|(id, r)| *id == panicking.id && r.contains("panicked")));
        assert!(!abandoned.iter().any(|(id, _)| *id == ok.id));
        Ok(())
    }

    #[tokio::test]
    async fn submissions_after_shutdown_are_rejected() -> Result<()> {
        let executor = Arc::new(RecordingExecutor::default());
        let runtime = ScanRuntime::start(executor, 1, 1);
        runtime.shutdown().await?;
        assert!(runtime.is_shut_down());
        assert!(matches!(
            runtime.submit(job("ok")).await,
            Err(ScanError::Internal(_))
        ));
        // Idempotent.
        runtime.shutdown().await
    }
}
