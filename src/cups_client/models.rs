use chrono::{DateTime, Utc};
use ipp::model::{JobState, PrinterState as IppPrinterState};

use crate::backend::{DriverJobState, DriverJobStatus, PrinterState};

/// A job as CUPS reports it through Get-Job-Attributes.
#[derive(Debug)]
pub struct CupsJobState {
    pub name: String,
    pub id: i32,
    pub state: Option<JobState>,
    pub raw_state: String,
    pub reason: String,
    pub created: Option<DateTime<Utc>>,
}

impl From<&CupsJobState> for DriverJobStatus {
    fn from(job: &CupsJobState) -> Self {
        let state = match job.state {
            Some(JobState::Pending) => DriverJobState::Pending,
            Some(JobState::PendingHeld) => DriverJobState::PendingHeld,
            Some(JobState::Processing) => DriverJobState::Processing,
            Some(JobState::ProcessingStopped) => DriverJobState::ProcessingStopped,
            Some(JobState::Canceled) => DriverJobState::Canceled,
            Some(JobState::Aborted) => DriverJobState::Aborted,
            Some(JobState::Completed) => DriverJobState::Completed,
            None => DriverJobState::Other(job.raw_state.clone()),
        };
        let reason = match job.reason.as_str() {
            "" | "none" => None,
            reason => Some(reason.to_string()),
        };
        DriverJobStatus { state, reason }
    }
}

pub fn printer_state_from_ipp(state: Option<IppPrinterState>) -> PrinterState {
    match state {
        Some(IppPrinterState::Idle) => PrinterState::Idle,
        Some(IppPrinterState::Processing) => PrinterState::Processing,
        Some(IppPrinterState::Stopped) => PrinterState::Stopped,
        None => PrinterState::Unknown,
    }
}

/// CUPS reports "none" when a printer has no state reasons.
pub fn clean_state_reasons(reasons: Vec<String>) -> Vec<String> {
    reasons.into_iter().filter(|reason| !reason.is_empty() && reason != "none").collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: Option<JobState>, reason: &str) -> CupsJobState {
        CupsJobState {
            name: "report.pdf".to_string(),
            id: 12,
            state,
            raw_state: "11".to_string(),
            reason: reason.to_string(),
            created: None,
        }
    }

    #[test]
    fn job_states_map_to_driver_states() {
        let status = DriverJobStatus::from(&job(Some(JobState::Aborted), "job-aborted-by-system"));
        assert_eq!(status.state, DriverJobState::Aborted);
        assert_eq!(status.reason.as_deref(), Some("job-aborted-by-system"));

        let status = DriverJobStatus::from(&job(Some(JobState::Processing), "none"));
        assert_eq!(status, DriverJobStatus { state: DriverJobState::Processing, reason: None });

        let status = DriverJobStatus::from(&job(None, ""));
        assert_eq!(status.state, DriverJobState::Other("11".to_string()));
    }

    #[test]
    fn printer_states_map_to_the_fixed_vocabulary() {
        assert_eq!(printer_state_from_ipp(Some(IppPrinterState::Stopped)), PrinterState::Stopped);
        assert_eq!(printer_state_from_ipp(None), PrinterState::Unknown);
    }

    #[test]
    fn none_reason_is_dropped() {
        assert!(clean_state_reasons(vec!["none".to_string()]).is_empty());
        assert_eq!(clean_state_reasons(vec!["media-empty".into(), "toner-low".into()]), vec!["media-empty", "toner-low"]);
    }
}
