//! Deterministic stand-in for a real printing subsystem.
//!
//! Exposes a single printer and plays every job through `pending -> processing ->
//! completed` on fixed delays. Names containing the configured markers fail
//! instead: the failure marker makes the job fail after processing, a missing
//! marker rejects the submission with `FileNotFound`.

use std::{
    path::Path,
    sync::atomic::{AtomicI32, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use snafu::ensure;
use tokio::time::Instant;

use crate::{
    backend::{
        BackendKind, DriverJobId, DriverJobState, DriverJobStatus, PrintBackend, PrintPayload, PrinterInfo, PrinterState, Submission,
        SubmittedJob,
    },
    config::models::Simulation,
    error::{FileNotFoundSnafu, PrintError, PrinterNotFoundSnafu, SimulatedFailureSnafu},
};

pub const SIMULATED_PRINTER_NAME: &str = "Simulated Printer";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Complete,
    Fail(String),
}

#[derive(Debug)]
struct SimulatedJob {
    submitted_at: Instant,
    outcome: Outcome,
}

pub struct SimulationEngine {
    settings: Simulation,
    jobs: DashMap<DriverJobId, SimulatedJob>,
    next_job_id: AtomicI32,
    submissions: AtomicU64,
}

impl SimulationEngine {
    pub fn new(settings: Simulation) -> Self {
        info!(
            "Simulation mode: jobs complete after {}, '{}' marks failures",
            humantime::format_duration(settings.completion_delay),
            settings.failure_marker
        );
        SimulationEngine {
            settings,
            jobs: DashMap::new(),
            next_job_id: AtomicI32::new(1),
            submissions: AtomicU64::new(0),
        }
    }

    pub fn printer() -> PrinterInfo {
        PrinterInfo {
            name: SIMULATED_PRINTER_NAME.to_string(),
            system_name: "Simulated_Printer".to_string(),
            driver_name: "Simulated Driver".to_string(),
            uri: "sim://printer".to_string(),
            port_name: "SIM:".to_string(),
            processor: "Simulated Processor".to_string(),
            data_type: "RAW".to_string(),
            description: "Simulated printer for testing".to_string(),
            location: "Test Location".to_string(),
            is_default: true,
            is_shared: false,
            state: PrinterState::Idle,
            state_reasons: Vec::new(),
        }
    }

    /// Number of submissions the engine accepted so far.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    fn is_missing(&self, name: &str) -> bool {
        self.settings.missing_markers.iter().any(|marker| !marker.is_empty() && name.contains(marker.as_str()))
    }

    fn classify(&self, label: &str, content: Option<&[u8]>) -> Outcome {
        let marker = self.settings.failure_marker.as_str();
        let marked_content = content.is_some_and(|bytes| bytes.windows(marker.len()).any(|window| window == marker.as_bytes()));
        if label.contains(marker) || marked_content {
            let message = format!("'{label}' matched the failure marker '{marker}'");
            Outcome::Fail(SimulatedFailureSnafu { message }.build().to_string())
        } else {
            Outcome::Complete
        }
    }

    fn status_of(&self, job: &SimulatedJob) -> DriverJobStatus {
        let elapsed = job.submitted_at.elapsed();
        let state = if elapsed < self.settings.start_delay {
            DriverJobState::Pending
        } else if elapsed < self.settings.completion_delay {
            DriverJobState::Processing
        } else {
            match &job.outcome {
                Outcome::Complete => DriverJobState::Completed,
                Outcome::Fail(message) => return DriverJobStatus { state: DriverJobState::Aborted, reason: Some(message.clone()) },
            }
        };
        DriverJobStatus { state, reason: None }
    }
}

#[async_trait]
impl PrintBackend for SimulationEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulation
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
        Ok(vec![SimulationEngine::printer()])
    }

    async fn submit(&self, printer_name: &str, payload: PrintPayload, submission: &Submission) -> Result<SubmittedJob, PrintError> {
        ensure!(printer_name == SIMULATED_PRINTER_NAME, PrinterNotFoundSnafu { name: printer_name });

        let (outcome, size_bytes) = match &payload {
            PrintPayload::File(path) => {
                let label = path.to_string_lossy();
                ensure!(!self.is_missing(&label), FileNotFoundSnafu { path: path.as_path() });
                (self.classify(&label, None), simulated_file_size(path).await)
            }
            PrintPayload::Bytes(data) => (self.classify(&submission.name, Some(data)), data.len() as u64),
        };

        let driver_job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        debug!("Simulated job {driver_job_id} '{}' accepted, outcome {outcome:?}", submission.name);
        self.jobs.insert(driver_job_id, SimulatedJob { submitted_at: Instant::now(), outcome });
        self.submissions.fetch_add(1, Ordering::Relaxed);

        Ok(SubmittedJob { driver_job_id, size_bytes })
    }

    async fn query_job_status(&self, printer_name: &str, job: DriverJobId) -> Result<Option<DriverJobStatus>, PrintError> {
        ensure!(printer_name == SIMULATED_PRINTER_NAME, PrinterNotFoundSnafu { name: printer_name });

        let Some(status) = self.jobs.get(&job).map(|entry| self.status_of(entry.value())) else {
            return Ok(None);
        };

        // Finished jobs are reported once, then forgotten.
        if matches!(status.state, DriverJobState::Completed | DriverJobState::Aborted) {
            self.jobs.remove(&job);
        }
        Ok(Some(status))
    }

    fn status_poll_interval(&self, _media_type: &str, _size_bytes: u64) -> Duration {
        self.settings.status_poll_interval
    }
}

/// Real size when the file happens to exist, zero otherwise. Simulated jobs never read the file.
async fn simulated_file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|metadata| metadata.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn engine() -> SimulationEngine {
        SimulationEngine::new(Simulation::default())
    }

    fn submission(name: &str) -> Submission {
        Submission { name: name.to_string(), media_type: "text/plain".to_string(), ..Submission::default() }
    }

    async fn submit_file(engine: &SimulationEngine, path: &str) -> Result<SubmittedJob, PrintError> {
        engine.submit(SIMULATED_PRINTER_NAME, PrintPayload::File(PathBuf::from(path)), &submission(path)).await
    }

    #[tokio::test]
    async fn exposes_one_fixed_printer() {
        let engine = engine();
        let printers = engine.list_printers().await.unwrap();
        assert_eq!(printers, vec![SimulationEngine::printer()]);
        assert!(engine.printer_exists(SIMULATED_PRINTER_NAME).await.unwrap());
        assert!(!engine.printer_exists("Office").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_printers_are_rejected() {
        let engine = engine();
        let err = engine.submit("Office", PrintPayload::Bytes(b"hi".to_vec()), &submission("hi")).await.unwrap_err();
        assert!(matches!(err, PrintError::PrinterNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_markers_fail_at_submission() {
        let engine = engine();
        for path in ["/tmp/nonexistent.pdf", "/path/that/does_not_exist/file.pdf"] {
            let err = submit_file(&engine, path).await.unwrap_err();
            assert!(matches!(err, PrintError::FileNotFound { .. }), "{path}");
        }
        assert_eq!(engine.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_progress_on_fixed_delays() {
        let engine = engine();
        let job = submit_file(&engine, "/tmp/document.pdf").await.unwrap();

        let state = |status: Option<DriverJobStatus>| status.unwrap().state;
        assert_eq!(state(engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap()), DriverJobState::Pending);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(state(engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap()), DriverJobState::Processing);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(state(engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap()), DriverJobState::Completed);

        // Reported once, then forgotten.
        assert!(engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_marker_aborts_the_job() {
        let engine = engine();
        let job = submit_file(&engine, "fail-test.txt").await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let status = engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap().unwrap();
        assert_eq!(status.state, DriverJobState::Aborted);
        assert_eq!(status.reason.unwrap(), "Simulated failure: 'fail-test.txt' matched the failure marker 'fail-test'");
    }

    #[tokio::test(start_paused = true)]
    async fn byte_jobs_are_classified_by_content() {
        let engine = engine();
        let ok = engine.submit(SIMULATED_PRINTER_NAME, PrintPayload::Bytes(b"Hello, printer!".to_vec()), &submission("greeting")).await.unwrap();
        let bad = engine.submit(SIMULATED_PRINTER_NAME, PrintPayload::Bytes(b"please fail-test now".to_vec()), &submission("raw")).await.unwrap();
        assert_eq!(ok.size_bytes, 15);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(engine_state(&engine, ok).await, DriverJobState::Completed);
        assert_eq!(engine_state(&engine, bad).await, DriverJobState::Aborted);
    }

    async fn engine_state(engine: &SimulationEngine, job: SubmittedJob) -> DriverJobState {
        engine.query_job_status(SIMULATED_PRINTER_NAME, job.driver_job_id).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn existing_files_report_their_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"twelve bytes").await.unwrap();

        let engine = engine();
        let job = submit_file(&engine, path.to_str().unwrap()).await.unwrap();
        assert_eq!(job.size_bytes, 12);
        assert_eq!(submit_file(&engine, "/tmp/absent-document.txt").await.unwrap().size_bytes, 0);
    }

    #[test]
    fn uses_a_small_fixed_poll_interval() {
        let engine = engine();
        assert_eq!(engine.status_poll_interval("image/png", 50_000_000), Duration::from_millis(50));
    }
}
