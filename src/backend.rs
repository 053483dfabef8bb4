//! The driver boundary: everything the core needs from a printing subsystem.
//!
//! Two implementations exist: [`CupsClient`](crate::cups_client::client::CupsClient)
//! talks to a CUPS server over IPP, and
//! [`SimulationEngine`](crate::simulation::engine::SimulationEngine) reproduces the
//! same contract deterministically for tests.

use std::{collections::HashMap, fmt, path::{Path, PathBuf}, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PrintError;

/// Job identifier assigned by the driver (IPP `job-id`), distinct from the tracker's [`JobId`](crate::jobs::models::JobId).
pub type DriverJobId = i32;

/// Media type used for raw byte jobs that do not declare one.
pub const RAW_MEDIA_TYPE: &str = "application/vnd.cups-raw";

const MEGABYTE: u64 = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cups,
    Simulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
    Unknown,
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrinterState::Idle => "idle",
            PrinterState::Processing => "processing",
            PrinterState::Stopped => "stopped",
            PrinterState::Unknown => "unknown",
        })
    }
}

/// Metadata the driver reports for one printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterInfo {
    pub name: String,
    pub system_name: String,
    pub driver_name: String,
    pub uri: String,
    pub port_name: String,
    pub processor: String,
    pub data_type: String,
    pub description: String,
    pub location: String,
    pub is_default: bool,
    pub is_shared: bool,
    pub state: PrinterState,
    pub state_reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum PrintPayload {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// What the driver needs to know about a job besides its payload.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub name: String,
    pub media_type: String,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedJob {
    pub driver_job_id: DriverJobId,
    pub size_bytes: u64,
}

/// Job states as a driver reports them (the IPP `job-state` vocabulary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverJobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverJobStatus {
    pub state: DriverJobState,
    pub reason: Option<String>,
}

/// Capability interface over a printing subsystem.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>, PrintError>;

    async fn find_printer(&self, name: &str) -> Result<Option<PrinterInfo>, PrintError> {
        Ok(self.list_printers().await?.into_iter().find(|printer| printer.name == name))
    }

    async fn printer_exists(&self, name: &str) -> Result<bool, PrintError> {
        Ok(self.find_printer(name).await?.is_some())
    }

    /// Hands a job to the driver. Errors here never produce a tracked job.
    async fn submit(&self, printer_name: &str, payload: PrintPayload, submission: &Submission) -> Result<SubmittedJob, PrintError>;

    /// Returns `Ok(None)` when the driver does not know the job (anymore).
    async fn query_job_status(&self, printer_name: &str, job: DriverJobId) -> Result<Option<DriverJobStatus>, PrintError>;

    /// How often a submitted job's status should be checked.
    fn status_poll_interval(&self, media_type: &str, size_bytes: u64) -> Duration {
        estimate_poll_interval(media_type, size_bytes)
    }
}

/// Heuristic status poll interval: small text jobs are checked sooner than large raster jobs.
pub fn estimate_poll_interval(media_type: &str, size_bytes: u64) -> Duration {
    let mut delay_ms = 1000;

    // One extra second per MB, capped at ten.
    delay_ms += (size_bytes / MEGABYTE * 1000).min(10_000);

    delay_ms += match media_type {
        m if m.starts_with("image/") => 1500,
        "application/pdf" | "application/postscript" => 1000,
        RAW_MEDIA_TYPE if size_bytes > 5 * MEGABYTE => 1500,
        _ => 0,
    };

    Duration::from_millis(delay_ms)
}

/// Derives a MIME-like media type from a file extension.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("ps") => "application/postscript",
        Some("txt" | "text") => "text/plain",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}
