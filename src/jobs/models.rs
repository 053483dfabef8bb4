use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{DriverJobState, DriverJobStatus};

/// Tracker-assigned job identifier. Never reused within a process.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Paused,
    Completed,
    Cancelled,
    Failed,
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobState::Pending | JobState::Processing | JobState::Paused)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        })
    }
}

/// One tracked print submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintJob {
    pub id: JobId,
    pub name: String,
    pub printer_name: String,
    pub media_type: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PrintJob {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// A state change reported for a job, applied by the tracker in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    Processing(JobId),
    Paused(JobId),
    Completed(JobId),
    Failed(JobId, String),
    Cancelled(JobId),
    Unknown(JobId),
}

impl JobTransition {
    pub fn job_id(&self) -> JobId {
        match self {
            JobTransition::Processing(id)
            | JobTransition::Paused(id)
            | JobTransition::Completed(id)
            | JobTransition::Failed(id, _)
            | JobTransition::Cancelled(id)
            | JobTransition::Unknown(id) => *id,
        }
    }

    /// Maps a driver-reported status onto a transition. `pending` carries no news and yields `None`.
    pub fn from_driver(id: JobId, status: DriverJobStatus) -> Option<JobTransition> {
        Some(match status.state {
            DriverJobState::Pending => return None,
            DriverJobState::Processing => JobTransition::Processing(id),
            DriverJobState::PendingHeld | DriverJobState::ProcessingStopped => JobTransition::Paused(id),
            DriverJobState::Completed => JobTransition::Completed(id),
            DriverJobState::Canceled => JobTransition::Cancelled(id),
            DriverJobState::Aborted => {
                JobTransition::Failed(id, status.reason.unwrap_or_else(|| "Job aborted by the printer".to_string()))
            }
            DriverJobState::Other(_) => JobTransition::Unknown(id),
        })
    }
}

/// Caller-facing options for a print submission.
#[derive(Debug, Clone)]
pub struct PrintOptions {
    pub name: Option<String>,
    /// Overrides the media type derived from the file extension.
    pub media_type: Option<String>,
    /// Raw driver properties (e.g. `copies`, `media`).
    pub properties: HashMap<String, String>,
    pub wait_for_completion: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        PrintOptions {
            name: None,
            media_type: None,
            properties: HashMap::new(),
            wait_for_completion: true,
        }
    }
}

impl PrintOptions {
    /// Builds options from a raw property map, lifting `job-name` out of it.
    pub fn from_properties(mut properties: HashMap<String, String>) -> Self {
        let name = properties.remove("job-name");
        PrintOptions { name, properties, ..PrintOptions::default() }
    }

    pub fn named(name: impl Into<String>) -> Self {
        PrintOptions { name: Some(name.into()), ..PrintOptions::default() }
    }

    pub fn no_wait(mut self) -> Self {
        self.wait_for_completion = false;
        self
    }
}
