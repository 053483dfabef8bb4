use serde::Serialize;

use crate::{
    backend::{PrinterInfo, PrinterState},
    jobs::models::{JobId, JobState, PrintJob},
    monitor::models::{PrinterEvent, PrinterEventKind},
};

// //// //
// Jobs //
// //// //

#[derive(Debug, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub name: String,
    pub printer_name: String,
    pub media_type: String,
    pub state: JobState,
    pub created_at: i64,
    pub processed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub age_seconds: u64,
    pub error_message: Option<String>,
}

impl From<&PrintJob> for JobReport {
    fn from(job: &PrintJob) -> Self {
        JobReport {
            id: job.id,
            name: job.name.clone(),
            printer_name: job.printer_name.clone(),
            media_type: job.media_type.clone(),
            state: job.state,
            created_at: job.created_at.timestamp(),
            processed_at: job.processed_at.map(|at| at.timestamp()),
            completed_at: job.completed_at.map(|at| at.timestamp()),
            age_seconds: job.age().as_secs(),
            error_message: job.error_message.clone(),
        }
    }
}

// //////// //
// Printers //
// //////// //

#[derive(Debug, Serialize)]
pub struct PrinterReport {
    pub name: String,
    pub description: String,
    pub location: String,
    pub driver_name: String,
    pub uri: String,
    pub is_default: bool,
    pub is_shared: bool,
    pub state: PrinterState,
    pub state_reasons: Vec<String>,
}

impl From<&PrinterInfo> for PrinterReport {
    fn from(printer: &PrinterInfo) -> Self {
        PrinterReport {
            name: printer.name.clone(),
            description: printer.description.clone(),
            location: printer.location.clone(),
            driver_name: printer.driver_name.clone(),
            uri: printer.uri.clone(),
            is_default: printer.is_default,
            is_shared: printer.is_shared,
            state: printer.state,
            state_reasons: printer.state_reasons.clone(),
        }
    }
}

// ////// //
// Events //
// ////// //

#[derive(Debug, Serialize)]
pub struct EventReport<'a> {
    pub printer_name: &'a str,
    #[serde(flatten)]
    pub kind: &'a PrinterEventKind,
    pub timestamp: i64,
}

impl<'a> From<&'a PrinterEvent> for EventReport<'a> {
    fn from(event: &'a PrinterEvent) -> Self {
        EventReport {
            printer_name: &event.printer_name,
            kind: &event.kind,
            timestamp: event.timestamp.timestamp(),
        }
    }
}
