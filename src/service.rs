//! The public face of the crate: printer lookup, print submission, job queries and
//! printer monitoring over one [`PrintBackend`].

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::{error, info, warn};
use snafu::{ensure, OptionExt};
use tokio::{sync::watch, task::JoinHandle, time::sleep};

use crate::{
    backend::{media_type_for_path, BackendKind, PrintBackend, PrintPayload, PrinterInfo, Submission, RAW_MEDIA_TYPE},
    config::{models::Settings, schedule::TimeSchedule},
    cups_client::client::CupsClient,
    error::{InvalidParametersSnafu, PrintError, PrinterNotFoundSnafu, ShutDownSnafu},
    jobs::{
        models::{JobId, PrintJob, PrintOptions},
        reconcile::JobReconciler,
        tracker::JobTracker,
        waiter::{self, WaitPolicy},
    },
    monitor::{
        models::{MonitorConfig, PrinterEvent, PrinterStateSnapshot},
        PrinterMonitor, Subscription,
    },
    printer::PrinterHandle,
    simulation::engine::SimulationEngine,
};

/// Name given to byte jobs submitted without one.
pub const RAW_JOB_NAME: &str = "Raw Bytes Print Job";

/// Tunables of a [`PrintService`] that do not concern the backend itself.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Upper bound for waiting on a job, both inside `print_*` and `wait_for_completion`.
    pub wait_timeout: Duration,
    /// How long a submitted job is followed at the driver.
    pub track_timeout: Duration,
    /// Age after which finished jobs are evicted by the periodic cleanup.
    pub max_age: Duration,
    /// `None` disables the periodic cleanup.
    pub cleanup_schedule: Option<TimeSchedule>,
    pub monitor: MonitorConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions {
            wait_timeout: Duration::from_secs(300),
            track_timeout: Duration::from_secs(3600),
            max_age: Duration::from_secs(3600),
            cleanup_schedule: Some(TimeSchedule::Interval(Duration::from_secs(600))),
            monitor: MonitorConfig::default(),
        }
    }
}

impl From<&Settings> for ServiceOptions {
    fn from(settings: &Settings) -> Self {
        ServiceOptions {
            wait_timeout: settings.jobs.wait_timeout,
            track_timeout: settings.jobs.track_timeout,
            max_age: settings.jobs.max_age,
            cleanup_schedule: Some(settings.jobs.cleanup_schedule.clone()),
            monitor: MonitorConfig { poll_interval: settings.monitor.poll_interval },
        }
    }
}

struct Inner {
    backend: Arc<dyn PrintBackend>,
    tracker: Arc<JobTracker>,
    reconciler: JobReconciler,
    monitor: PrinterMonitor,
    shutdown: watch::Sender<bool>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    options: ServiceOptions,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(cleanup) = self.cleanup.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            cleanup.abort();
        }
    }
}

/// Cheaply cloneable handle to the print core. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct PrintService {
    inner: Arc<Inner>,
}

impl PrintService {
    /// Validates `settings` and picks the backend once: the simulation engine when
    /// `simulate` is set, CUPS otherwise.
    pub fn from_settings(settings: &Settings) -> Result<Self, PrintError> {
        settings.validate()?;
        let backend: Arc<dyn PrintBackend> = if settings.simulate {
            Arc::new(SimulationEngine::new(settings.simulation.clone()))
        } else {
            Arc::new(CupsClient::new(settings.cups.clone())?)
        };
        PrintService::with_backend(backend, ServiceOptions::from(settings))
    }

    pub fn with_backend(backend: Arc<dyn PrintBackend>, options: ServiceOptions) -> Result<Self, PrintError> {
        let monitor = PrinterMonitor::new(Arc::clone(&backend), options.monitor)?;
        let tracker = Arc::new(JobTracker::new());
        let (updater, _consumer) = tracker.spawn_updater();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let reconciler = JobReconciler::new(Arc::clone(&backend), updater, shutdown_rx.clone(), options.track_timeout);

        let cleanup = options
            .cleanup_schedule
            .clone()
            .map(|schedule| tokio::spawn(run_cleanup(Arc::clone(&tracker), schedule, options.max_age, shutdown_rx)));

        info!("Print service ready ({:?} backend)", backend.kind());
        Ok(PrintService {
            inner: Arc::new(Inner {
                backend,
                tracker,
                reconciler,
                monitor,
                shutdown,
                cleanup: Mutex::new(cleanup),
                options,
            }),
        })
    }

    pub fn is_simulation_mode(&self) -> bool {
        self.inner.backend.kind() == BackendKind::Simulation
    }

    /// True once [`shutdown`](PrintService::shutdown) was called. Submissions are rejected from then on.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub(crate) fn tracker(&self) -> &JobTracker {
        &self.inner.tracker
    }

    // Printers

    pub async fn list_printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
        self.inner.backend.list_printers().await
    }

    pub async fn printer_names(&self) -> Result<Vec<String>, PrintError> {
        Ok(self.list_printers().await?.into_iter().map(|printer| printer.name).collect())
    }

    pub async fn find_printer(&self, name: &str) -> Result<Option<PrinterHandle>, PrintError> {
        let printer = self.inner.backend.find_printer(name).await?;
        Ok(printer.map(|info| PrinterHandle::new(info, self.clone())))
    }

    pub async fn printer(&self, name: &str) -> Result<PrinterHandle, PrintError> {
        self.find_printer(name).await?.context(PrinterNotFoundSnafu { name })
    }

    pub async fn printer_exists(&self, name: &str) -> Result<bool, PrintError> {
        self.inner.backend.printer_exists(name).await
    }

    pub async fn default_printer(&self) -> Result<Option<PrinterHandle>, PrintError> {
        let printers = self.list_printers().await?;
        Ok(printers.into_iter().find(|printer| printer.is_default).map(|info| PrinterHandle::new(info, self.clone())))
    }

    // Printing

    /// Prints the file at `path` on `printer_name` and returns the new job's id.
    ///
    /// With `wait_for_completion` set the call returns once the job is terminal. A
    /// job that failed at the printer still yields its id; the failure is on the record.
    pub async fn print_file(&self, printer_name: &str, path: impl AsRef<Path>, options: PrintOptions) -> Result<JobId, PrintError> {
        let path = path.as_ref();
        ensure!(!path.as_os_str().is_empty(), InvalidParametersSnafu { message: "file path must not be empty" });

        let media_type = options.media_type.clone().unwrap_or_else(|| media_type_for_path(path).to_string());
        let name = options.name.clone().unwrap_or_else(|| match path.file_name() {
            Some(file_name) => file_name.to_string_lossy().into_owned(),
            None => path.display().to_string(),
        });
        self.submit(printer_name, PrintPayload::File(path.to_path_buf()), name, media_type, options).await
    }

    /// Prints raw bytes. Defaults to the CUPS raw media type and a generic job name.
    pub async fn print_bytes(&self, printer_name: &str, data: impl Into<Vec<u8>>, options: PrintOptions) -> Result<JobId, PrintError> {
        let data = data.into();
        ensure!(!data.is_empty(), InvalidParametersSnafu { message: "print data must not be empty" });

        let media_type = options.media_type.clone().unwrap_or_else(|| RAW_MEDIA_TYPE.to_string());
        let name = options.name.clone().unwrap_or_else(|| RAW_JOB_NAME.to_string());
        self.submit(printer_name, PrintPayload::Bytes(data), name, media_type, options).await
    }

    async fn submit(&self, printer_name: &str, payload: PrintPayload, name: String, media_type: String, options: PrintOptions) -> Result<JobId, PrintError> {
        ensure!(!self.is_shut_down(), ShutDownSnafu);
        ensure!(!printer_name.trim().is_empty(), InvalidParametersSnafu { message: "printer name must not be empty" });
        ensure!(self.printer_exists(printer_name).await?, PrinterNotFoundSnafu { name: printer_name });

        let submission = Submission { name, media_type, properties: options.properties };
        let submitted = self.inner.backend.submit(printer_name, payload, &submission).await?;
        // Nothing would follow the job anymore.
        ensure!(!self.is_shut_down(), ShutDownSnafu);

        let id = self.inner.tracker.submit(printer_name, &submission.media_type, &submission.name);
        let poll_interval = self.inner.backend.status_poll_interval(&submission.media_type, submitted.size_bytes);
        self.inner.reconciler.spawn(id, printer_name.to_string(), submitted.driver_job_id, poll_interval);

        if !options.wait_for_completion {
            return Ok(id);
        }
        let policy = WaitPolicy::fixed(poll_interval, self.inner.options.wait_timeout);
        match waiter::wait_for_completion(&self.inner.tracker, id, &policy).await {
            Ok(_) => Ok(id),
            Err(PrintError::JobFailed { message, .. }) => {
                warn!("Job {id} on '{printer_name}' did not complete: {message}");
                Ok(id)
            }
            Err(err) => Err(err),
        }
    }

    /// Waits for `id` to become terminal. Uses the default backoff bounded by the
    /// configured wait timeout when no policy is given.
    pub async fn wait_for_completion(&self, id: JobId, policy: Option<WaitPolicy>) -> Result<PrintJob, PrintError> {
        let policy = policy.unwrap_or_else(|| WaitPolicy::default().with_timeout(self.inner.options.wait_timeout));
        waiter::wait_for_completion(&self.inner.tracker, id, &policy).await
    }

    // Jobs

    pub fn get_job(&self, id: JobId) -> Option<PrintJob> {
        self.inner.tracker.get_job(id)
    }

    pub fn get_active_jobs(&self) -> Vec<PrintJob> {
        self.inner.tracker.get_active_jobs()
    }

    pub fn get_job_history(&self, limit: Option<usize>) -> Vec<PrintJob> {
        self.inner.tracker.get_job_history(limit)
    }

    pub fn get_all_jobs(&self) -> Vec<PrintJob> {
        self.inner.tracker.get_all_jobs()
    }

    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        self.inner.tracker.cleanup_old_jobs(max_age)
    }

    // Monitoring

    pub fn monitor(&self) -> &PrinterMonitor {
        &self.inner.monitor
    }

    pub async fn start_monitoring(&self, config: Option<MonitorConfig>) -> Result<(), PrintError> {
        self.inner.monitor.start_monitoring(config).await
    }

    pub fn stop_monitoring(&self) {
        self.inner.monitor.stop_monitoring();
    }

    pub fn is_monitoring_active(&self) -> bool {
        self.inner.monitor.is_monitoring_active()
    }

    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PrinterEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.monitor.subscribe(callback).await
    }

    pub fn set_poll_interval(&self, interval: Duration) -> Result<(), PrintError> {
        self.inner.monitor.set_poll_interval(interval)
    }

    pub fn get_snapshots(&self) -> std::collections::HashMap<String, PrinterStateSnapshot> {
        self.inner.monitor.get_snapshots()
    }

    /// Stops job reconciliation, the periodic cleanup and the monitor, then forgets every job.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        if let Some(cleanup) = self.inner.cleanup.lock().unwrap_or_else(PoisonError::into_inner).take() {
            cleanup.abort();
        }
        self.inner.monitor.stop_monitoring();
        self.inner.tracker.clear();
        info!("Print service shut down");
    }
}

async fn run_cleanup(tracker: Arc<JobTracker>, schedule: TimeSchedule, max_age: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = match schedule.get_duration_till_next_occurrence() {
            Ok(delay) => delay,
            Err(err) => {
                error!("Periodic job cleanup disabled: {err}");
                return;
            }
        };
        tokio::select! {
            _ = sleep(delay) => {
                tracker.cleanup_old_jobs(max_age);
            }
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::models::Simulation, jobs::models::JobState, simulation::engine::SIMULATED_PRINTER_NAME};

    fn service(options: ServiceOptions) -> PrintService {
        PrintService::with_backend(Arc::new(SimulationEngine::new(Simulation::default())), options).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn reports_simulation_mode() {
        let service = service(ServiceOptions::default());
        assert!(service.is_simulation_mode());
        assert_eq!(service.printer_names().await.unwrap(), vec![SIMULATED_PRINTER_NAME]);
        assert_eq!(service.default_printer().await.unwrap().unwrap().name(), SIMULATED_PRINTER_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_inputs_are_invalid_parameters() {
        let service = service(ServiceOptions::default());
        let err = service.print_bytes(SIMULATED_PRINTER_NAME, Vec::<u8>::new(), PrintOptions::default()).await.unwrap_err();
        assert!(matches!(err, PrintError::InvalidParameters { .. }));
        let err = service.print_file("", "/tmp/a.txt", PrintOptions::default()).await.unwrap_err();
        assert!(matches!(err, PrintError::InvalidParameters { .. }));
        let err = service.print_file(SIMULATED_PRINTER_NAME, "", PrintOptions::default()).await.unwrap_err();
        assert!(matches!(err, PrintError::InvalidParameters { .. }));
        assert!(service.get_all_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn names_and_media_types_have_defaults() {
        let service = service(ServiceOptions::default());
        let file = service.print_file(SIMULATED_PRINTER_NAME, "/tmp/docs/report.pdf", PrintOptions::default().no_wait()).await.unwrap();
        let bytes = service.print_bytes(SIMULATED_PRINTER_NAME, "hello", PrintOptions::default().no_wait()).await.unwrap();

        let file = service.get_job(file).unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.media_type, "application/pdf");
        let bytes = service.get_job(bytes).unwrap();
        assert_eq!(bytes.name, RAW_JOB_NAME);
        assert_eq!(bytes.media_type, RAW_MEDIA_TYPE);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_cleanup_evicts_finished_jobs() {
        let service = service(ServiceOptions {
            max_age: Duration::ZERO,
            cleanup_schedule: Some(TimeSchedule::Interval(Duration::from_secs(5))),
            ..ServiceOptions::default()
        });
        let id = service.print_bytes(SIMULATED_PRINTER_NAME, "hello", PrintOptions::default()).await.unwrap();
        assert_eq!(service.get_job(id).unwrap().state, JobState::Completed);

        // Job timestamps follow the wall clock, not tokio's paused one.
        std::thread::sleep(Duration::from_millis(5));
        sleep(Duration::from_secs(6)).await;
        assert!(service.get_job(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_interval_schedule_drives_cleanup() {
        let schedule: TimeSchedule = "10m".parse().unwrap();
        assert!(matches!(schedule, TimeSchedule::Interval(_)));
        let service = service(ServiceOptions { max_age: Duration::ZERO, cleanup_schedule: Some(schedule), ..ServiceOptions::default() });
        let id = service.print_bytes(SIMULATED_PRINTER_NAME, "hello", PrintOptions::default()).await.unwrap();

        std::thread::sleep(Duration::from_millis(5));
        sleep(Duration::from_secs(9 * 60)).await;
        assert!(service.get_job(id).is_some());
        sleep(Duration::from_secs(2 * 60)).await;
        assert!(service.get_job(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_forgets_jobs_and_stops_monitoring() {
        let service = service(ServiceOptions::default());
        service.print_bytes(SIMULATED_PRINTER_NAME, "hello", PrintOptions::default().no_wait()).await.unwrap();
        service.start_monitoring(None).await.unwrap();
        assert!(service.is_monitoring_active());

        service.shutdown();
        assert!(service.is_shut_down());
        assert!(!service.is_monitoring_active());
        assert!(service.get_all_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_after_shutdown_are_rejected() {
        let service = service(ServiceOptions::default());
        service.shutdown();

        let started = tokio::time::Instant::now();
        let err = service.print_bytes(SIMULATED_PRINTER_NAME, "hello", PrintOptions::default()).await.unwrap_err();

        assert!(matches!(err, PrintError::ShutDown));
        assert_eq!(err.code(), 15);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(service.get_all_jobs().is_empty());
    }
}
