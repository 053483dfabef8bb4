use std::{path::Path, time::Duration};

use chrono::Utc;

use crate::{
    backend::PrinterInfo,
    error::PrintError,
    jobs::models::{JobId, PrintJob, PrintOptions},
    service::PrintService,
};

/// One printer as it was reported when the handle was looked up.
///
/// The metadata is not refreshed; printing and job queries go through the owning
/// [`PrintService`] and are scoped to this printer.
#[derive(Clone)]
pub struct PrinterHandle {
    info: PrinterInfo,
    service: PrintService,
}

impl PrinterHandle {
    pub(crate) fn new(info: PrinterInfo, service: PrintService) -> Self {
        PrinterHandle { info, service }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &PrinterInfo {
        &self.info
    }

    /// Asks the backend whether the printer is still there.
    pub async fn exists(&self) -> Result<bool, PrintError> {
        self.service.printer_exists(self.name()).await
    }

    pub async fn print_file(&self, path: impl AsRef<Path>, options: PrintOptions) -> Result<JobId, PrintError> {
        self.service.print_file(self.name(), path, options).await
    }

    pub async fn print_bytes(&self, data: impl Into<Vec<u8>>, options: PrintOptions) -> Result<JobId, PrintError> {
        self.service.print_bytes(self.name(), data, options).await
    }

    /// The job, if it exists and was printed on this printer.
    pub fn get_job(&self, id: JobId) -> Option<PrintJob> {
        self.service.get_job(id).filter(|job| job.printer_name == self.info.name)
    }

    pub fn active_jobs(&self) -> Vec<PrintJob> {
        self.service.tracker().collect(|job| job.is_active() && self.owns(job))
    }

    pub fn job_history(&self, limit: Option<usize>) -> Vec<PrintJob> {
        let mut history: Vec<PrintJob> = self.service.get_job_history(None).into_iter().filter(|job| self.owns(job)).collect();
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        history
    }

    pub fn all_jobs(&self) -> Vec<PrintJob> {
        self.service.tracker().collect(|job| self.owns(job))
    }

    /// Evicts this printer's finished jobs older than `max_age`.
    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        self.service.tracker().cleanup_matching(Utc::now(), max_age, |job| self.owns(job))
    }

    fn owns(&self, job: &PrintJob) -> bool {
        job.printer_name == self.info.name
    }
}

impl std::fmt::Debug for PrinterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterHandle").field("info", &self.info).finish_non_exhaustive()
    }
}
