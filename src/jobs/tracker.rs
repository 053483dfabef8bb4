use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};

use super::models::{JobId, JobState, JobTransition, PrintJob};

/// First id handed out by a fresh tracker.
pub const FIRST_JOB_ID: JobId = 1000;

/// In-memory table of print jobs.
///
/// Every job's state only moves forward: once a job is terminal, later transitions
/// for it are ignored, so duplicate or late completion signals are harmless.
pub struct JobTracker {
    jobs: DashMap<JobId, PrintJob>,
    next_id: AtomicU64,
}

impl Default for JobTracker {
    fn default() -> Self {
        JobTracker::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        JobTracker {
            jobs: DashMap::new(),
            next_id: AtomicU64::new(FIRST_JOB_ID),
        }
    }

    /// Registers a new `pending` job and returns its id.
    pub fn submit(&self, printer_name: &str, media_type: &str, name: &str) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.jobs.insert(id, PrintJob {
            id,
            name: name.to_string(),
            printer_name: printer_name.to_string(),
            media_type: media_type.to_string(),
            state: JobState::Pending,
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            error_message: None,
        });
        info!("Registered job {id} '{name}' for printer '{printer_name}' ({media_type})");
        id
    }

    pub fn mark_processing(&self, id: JobId) -> bool {
        self.apply(JobTransition::Processing(id))
    }

    pub fn mark_paused(&self, id: JobId) -> bool {
        self.apply(JobTransition::Paused(id))
    }

    pub fn mark_completed(&self, id: JobId) -> bool {
        self.apply(JobTransition::Completed(id))
    }

    pub fn mark_failed(&self, id: JobId, message: impl Into<String>) -> bool {
        self.apply(JobTransition::Failed(id, message.into()))
    }

    pub fn mark_cancelled(&self, id: JobId) -> bool {
        self.apply(JobTransition::Cancelled(id))
    }

    /// Applies one transition. Returns whether the job record changed.
    pub fn apply(&self, transition: JobTransition) -> bool {
        let id = transition.job_id();
        let Some(mut job) = self.jobs.get_mut(&id) else {
            debug!("Ignoring {transition:?}: job {id} is not tracked");
            return false;
        };

        let current = job.state;
        if current.is_terminal() {
            debug!("Ignoring {transition:?}: job {id} is already {current}");
            return false;
        }

        let now = Utc::now();
        let next = match transition {
            JobTransition::Processing(_) => match current {
                JobState::Pending | JobState::Paused | JobState::Unknown => {
                    job.processed_at.get_or_insert(now);
                    JobState::Processing
                }
                _ => return false,
            },
            JobTransition::Paused(_) => match current {
                JobState::Pending | JobState::Processing | JobState::Unknown => JobState::Paused,
                _ => return false,
            },
            JobTransition::Unknown(_) if current == JobState::Unknown => return false,
            JobTransition::Unknown(_) => JobState::Unknown,
            JobTransition::Completed(_) => JobState::Completed,
            JobTransition::Cancelled(_) => JobState::Cancelled,
            JobTransition::Failed(_, message) => {
                job.error_message = Some(message);
                JobState::Failed
            }
        };

        if next.is_terminal() {
            job.completed_at = Some(now);
        }
        job.state = next;
        debug!("Job {id}: {current} -> {next}");
        true
    }

    pub fn get_job(&self, id: JobId) -> Option<PrintJob> {
        self.jobs.get(&id).map(|job| job.value().clone())
    }

    /// Pending, processing and paused jobs, oldest first.
    pub fn get_active_jobs(&self) -> Vec<PrintJob> {
        self.collect(|job| job.is_active())
    }

    /// Terminal jobs, most recently finished first.
    pub fn get_job_history(&self, limit: Option<usize>) -> Vec<PrintJob> {
        let mut history = self.collect(|job| job.is_terminal());
        history.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        history
    }

    pub fn get_all_jobs(&self) -> Vec<PrintJob> {
        self.collect(|_| true)
    }

    pub(crate) fn collect(&self, filter: impl Fn(&PrintJob) -> bool) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self.jobs.iter().filter(|job| filter(job.value())).map(|job| job.value().clone()).collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Evicts terminal jobs that finished more than `max_age` ago. Active jobs are never evicted.
    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        self.cleanup_matching(Utc::now(), max_age, |_| true)
    }

    pub(crate) fn cleanup_matching(&self, now: DateTime<Utc>, max_age: Duration, filter: impl Fn(&PrintJob) -> bool) -> usize {
        let mut removed = 0;
        self.jobs.retain(|_, job| {
            let finished_at = match (job.is_terminal(), job.completed_at) {
                (true, Some(finished_at)) => finished_at,
                _ => return true,
            };
            let expired = (now - finished_at).to_std().is_ok_and(|age| age > max_age);
            if expired && filter(job) {
                removed += 1;
                return false;
            }
            true
        });

        if removed > 0 {
            info!("Cleaned up {removed} finished job(s) older than {}", humantime::format_duration(max_age));
        }
        removed
    }

    pub fn clear(&self) {
        self.jobs.clear();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Starts the single consumer that applies transitions sent through the returned [`JobUpdater`].
    ///
    /// The consumer stops once every updater clone has been dropped.
    pub fn spawn_updater(self: &Arc<Self>) -> (JobUpdater, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobTransition>();
        let tracker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(transition) = rx.recv().await {
                tracker.apply(transition);
            }
            debug!("Job updater stopped");
        });
        (JobUpdater { tx }, handle)
    }
}

/// Cloneable, thread-safe handle for reporting job transitions from outside the tracker's owner.
#[derive(Debug, Clone)]
pub struct JobUpdater {
    tx: mpsc::UnboundedSender<JobTransition>,
}

impl JobUpdater {
    pub fn send(&self, transition: JobTransition) {
        if let Err(err) = self.tx.send(transition) {
            warn!("Dropping {:?}: the job tracker is gone", err.0);
        }
    }
}
