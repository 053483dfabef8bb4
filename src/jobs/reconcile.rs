use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, Instant},
};

use crate::backend::{DriverJobId, DriverJobState, PrintBackend};

use super::{
    models::{JobId, JobTransition},
    tracker::JobUpdater,
};

/// Consecutive driver errors after which a job is recorded as failed.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Follows submitted jobs at the driver and reports their transitions to the tracker.
#[derive(Clone)]
pub struct JobReconciler {
    backend: Arc<dyn PrintBackend>,
    updater: JobUpdater,
    shutdown: watch::Receiver<bool>,
    track_timeout: Duration,
}

impl JobReconciler {
    pub fn new(backend: Arc<dyn PrintBackend>, updater: JobUpdater, shutdown: watch::Receiver<bool>, track_timeout: Duration) -> Self {
        JobReconciler { backend, updater, shutdown, track_timeout }
    }

    pub fn spawn(&self, job_id: JobId, printer_name: String, driver_job_id: DriverJobId, poll_interval: Duration) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move { reconciler.track(job_id, printer_name, driver_job_id, poll_interval).await })
    }

    async fn track(mut self, job_id: JobId, printer_name: String, driver_job_id: DriverJobId, poll_interval: Duration) {
        let started = Instant::now();
        let mut consecutive_errors = 0;

        loop {
            if *self.shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = sleep(poll_interval) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("Stopped tracking job {job_id}: shutting down");
                        return;
                    }
                    continue;
                }
            }

            if started.elapsed() >= self.track_timeout {
                let message = format!("Stopped tracking after {}", humantime::format_duration(self.track_timeout));
                warn!("Job {job_id}: {message}");
                self.updater.send(JobTransition::Failed(job_id, message));
                return;
            }

            match self.backend.query_job_status(&printer_name, driver_job_id).await {
                Ok(Some(status)) => {
                    consecutive_errors = 0;
                    let terminal = matches!(status.state, DriverJobState::Completed | DriverJobState::Canceled | DriverJobState::Aborted);
                    if let Some(transition) = JobTransition::from_driver(job_id, status) {
                        self.updater.send(transition);
                    }
                    if terminal {
                        return;
                    }
                }
                Ok(None) => {
                    // The driver forgets finished jobs unless it keeps a job history.
                    debug!("Driver job {driver_job_id} for job {job_id} is gone, assuming it completed");
                    self.updater.send(JobTransition::Completed(job_id));
                    return;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!("Could not query status of job {job_id} ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): {err}");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.updater.send(JobTransition::Failed(job_id, err.to_string()));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        backend::{BackendKind, DriverJobStatus, PrintPayload, PrinterInfo, Submission, SubmittedJob},
        error::{DriverRejectedSnafu, PrintError},
        jobs::{
            models::{JobState, PrintJob},
            tracker::JobTracker,
        },
    };

    /// Replays a fixed script of status answers, one per query.
    struct ScriptedBackend {
        answers: Mutex<Vec<Result<Option<DriverJobStatus>, String>>>,
    }

    #[async_trait]
    impl PrintBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Cups
        }

        async fn list_printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
            Ok(Vec::new())
        }

        async fn submit(&self, _: &str, _: PrintPayload, _: &Submission) -> Result<SubmittedJob, PrintError> {
            unreachable!("not used by the reconciler")
        }

        async fn query_job_status(&self, _: &str, _: DriverJobId) -> Result<Option<DriverJobStatus>, PrintError> {
            let mut answers = self.answers.lock().unwrap();
            match answers.remove(0) {
                Ok(status) => Ok(status),
                Err(status) => DriverRejectedSnafu { operation: "Get-Job-Attributes", status }.fail(),
            }
        }
    }

    fn status(state: DriverJobState) -> Result<Option<DriverJobStatus>, String> {
        Ok(Some(DriverJobStatus { state, reason: None }))
    }

    async fn run(answers: Vec<Result<Option<DriverJobStatus>, String>>) -> JobState {
        run_with_timeout(answers, Duration::from_secs(60)).await.state
    }

    async fn run_with_timeout(answers: Vec<Result<Option<DriverJobStatus>, String>>, track_timeout: Duration) -> PrintJob {
        let backend = Arc::new(ScriptedBackend { answers: Mutex::new(answers) });
        let tracker = Arc::new(JobTracker::new());
        let id = tracker.submit("Office", "text/plain", "job");
        let (updater, consumer) = tracker.spawn_updater();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconciler = JobReconciler::new(backend, updater, shutdown_rx, track_timeout);
        reconciler.spawn(id, "Office".into(), 1, Duration::from_millis(10)).await.unwrap();
        drop(reconciler);
        consumer.await.unwrap();

        tracker.get_job(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_driver_to_completion() {
        let state = run(vec![
            status(DriverJobState::Pending),
            status(DriverJobState::Processing),
            status(DriverJobState::Completed),
        ])
        .await;
        assert_eq!(state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_jobs_count_as_completed() {
        let state = run(vec![status(DriverJobState::Processing), Ok(None)]).await;
        assert_eq!(state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_tolerated() {
        let state = run(vec![Err("server-error-busy".into()), status(DriverJobState::Canceled)]).await;
        assert_eq!(state, JobState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_errors_fail_the_job() {
        let state = run((0..MAX_CONSECUTIVE_ERRORS).map(|_| Err("server-error-busy".to_string())).collect()).await;
        assert_eq!(state, JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn giving_up_fails_the_job() {
        let answers = (0..20).map(|_| status(DriverJobState::Processing)).collect();
        let job = run_with_timeout(answers, Duration::from_millis(55)).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error_message.unwrap().starts_with("Stopped tracking after"));
    }
}
