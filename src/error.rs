use std::{path::PathBuf, time::Duration};

use snafu::Snafu;

use crate::jobs::models::JobId;

// ////// //
// Errors //
// ////// //

/// Every failure the print core can report.
///
/// Submission-time errors (`InvalidParameters`, `PrinterNotFound`, `FileNotFound`)
/// are returned before a job is tracked. Failures that happen after submission are
/// recorded on the job and only surface through [`JobFailed`](PrintError::JobFailed)
/// when a caller waits on it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PrintError {
    #[snafu(display("Invalid parameters: {message}"))]
    InvalidParameters { message: String },

    #[snafu(display("Printer '{name}' not found"))]
    PrinterNotFound { name: String },

    #[snafu(display("File not found: {}", path.display()))]
    FileNotFound { path: PathBuf },

    #[snafu(display("Simulated failure: {message}"))]
    SimulatedFailure { message: String },

    #[snafu(display("Job {id} not found"))]
    JobNotFound { id: JobId },

    #[snafu(display("Gave up waiting for job {id} after {}", humantime::format_duration(*waited)))]
    Timeout { id: JobId, waited: Duration },

    #[snafu(display("Job {id} failed: {message}"))]
    JobFailed { id: JobId, message: String },

    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfiguration { message: String },

    #[snafu(display("IPP {operation} request failed"))]
    Driver {
        operation: String,
        source: ipp::error::IppError,
    },

    #[snafu(display("IPP {operation} was rejected with status {status}"))]
    DriverRejected { operation: String, status: String },

    #[snafu(display("The print service has been shut down"))]
    ShutDown,

    #[snafu(display("Could not read {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PrintError {
    /// Stable numeric code for the error, for callers that report failures across a process boundary.
    pub fn code(&self) -> i32 {
        match self {
            PrintError::InvalidParameters { .. } => 1,
            PrintError::PrinterNotFound { .. } => 6,
            PrintError::FileNotFound { .. } => 7,
            PrintError::SimulatedFailure { .. } => 8,
            PrintError::JobNotFound { .. } => 9,
            PrintError::Timeout { .. } => 10,
            PrintError::JobFailed { .. } => 11,
            PrintError::InvalidConfiguration { .. } => 12,
            PrintError::Driver { .. } | PrintError::DriverRejected { .. } => 13,
            PrintError::Io { .. } => 14,
            PrintError::ShutDown => 15,
        }
    }
}
