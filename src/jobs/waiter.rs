use std::time::Duration;

use log::debug;
use snafu::{ensure, OptionExt};
use tokio::time::{sleep, Instant};

use crate::error::{JobFailedSnafu, JobNotFoundSnafu, PrintError, TimeoutSnafu};

use super::{
    models::{JobId, JobState, PrintJob},
    tracker::JobTracker,
};

/// How long and how often to watch a job for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// When false, return as soon as the job is registered.
    pub wait: bool,
    pub poll_interval: Duration,
    /// The interval doubles after every check, up to this ceiling.
    pub max_poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy {
            wait: true,
            poll_interval: Duration::from_millis(250),
            max_poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl WaitPolicy {
    pub fn no_wait() -> Self {
        WaitPolicy { wait: false, ..WaitPolicy::default() }
    }

    /// Polls at a fixed interval.
    pub fn fixed(poll_interval: Duration, timeout: Duration) -> Self {
        WaitPolicy { wait: true, poll_interval, max_poll_interval: poll_interval, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Watches the tracker until `id` is terminal or the policy's timeout elapses.
///
/// Resolves with the job once it completed. A cancelled or failed job rejects with
/// [`PrintError::JobFailed`], and giving up rejects with [`PrintError::Timeout`].
pub async fn wait_for_completion(tracker: &JobTracker, id: JobId, policy: &WaitPolicy) -> Result<PrintJob, PrintError> {
    let started = Instant::now();
    let mut interval = policy.poll_interval;

    loop {
        let job = tracker.get_job(id).context(JobNotFoundSnafu { id })?;
        if !policy.wait {
            return Ok(job);
        }

        match job.state {
            JobState::Completed => return Ok(job),
            JobState::Cancelled => {
                let message = job.error_message.unwrap_or_else(|| "Job was cancelled".to_string());
                return JobFailedSnafu { id, message }.fail();
            }
            JobState::Failed => {
                let message = job.error_message.unwrap_or_else(|| "Job failed".to_string());
                return JobFailedSnafu { id, message }.fail();
            }
            _ => {}
        }

        let waited = started.elapsed();
        ensure!(waited < policy.timeout, TimeoutSnafu { id, waited });

        debug!("Job {id} is {}, checking again in {interval:?}", job.state);
        sleep(interval.min(policy.timeout - waited)).await;
        interval = (interval * 2).min(policy.max_poll_interval.max(policy.poll_interval));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn no_wait_returns_the_registered_job() {
        let tracker = JobTracker::new();
        let id = tracker.submit("A", "text/plain", "job");
        let job = wait_for_completion(&tracker, id, &WaitPolicy::no_wait()).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn unknown_jobs_are_reported() {
        let tracker = JobTracker::new();
        let err = wait_for_completion(&tracker, 999, &WaitPolicy::default()).await.unwrap_err();
        assert!(matches!(err, PrintError::JobNotFound { id: 999 }));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_the_job_completes() {
        let tracker = Arc::new(JobTracker::new());
        let id = tracker.submit("A", "text/plain", "job");

        let background = Arc::clone(&tracker);
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            background.mark_processing(id);
            sleep(Duration::from_millis(300)).await;
            background.mark_completed(id);
        });

        let started = Instant::now();
        let job = wait_for_completion(&tracker, id, &WaitPolicy::fixed(Duration::from_millis(100), Duration::from_secs(5))).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reject_with_the_recorded_message() {
        let tracker = JobTracker::new();
        let id = tracker.submit("A", "text/plain", "job");
        tracker.mark_failed(id, "Simulated failure: fail-test.txt");

        let err = wait_for_completion(&tracker, id, &WaitPolicy::default()).await.unwrap_err();
        match err {
            PrintError::JobFailed { id: failed, message } => {
                assert_eq!(failed, id);
                assert!(message.contains("Simulated failure"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_jobs_reject_too() {
        let tracker = JobTracker::new();
        let id = tracker.submit("A", "text/plain", "job");
        tracker.mark_cancelled(id);

        let err = wait_for_completion(&tracker, id, &WaitPolicy::default()).await.unwrap_err();
        assert!(matches!(err, PrintError::JobFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_timeout() {
        let tracker = JobTracker::new();
        let id = tracker.submit("A", "text/plain", "stuck");

        let started = Instant::now();
        let err = wait_for_completion(&tracker, id, &WaitPolicy::default().with_timeout(Duration::from_secs(3))).await.unwrap_err();
        assert!(matches!(err, PrintError::Timeout { id: timed_out, .. } if timed_out == id));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
