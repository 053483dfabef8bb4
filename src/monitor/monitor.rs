use std::{
    collections::{BTreeMap, HashMap},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
    },
    time::Duration,
};

use chrono::Utc;
use log::{debug, error, info, warn};
use snafu::OptionExt;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    backend::PrintBackend,
    config::models::validate_poll_interval,
    error::{InvalidConfigurationSnafu, PrintError},
};

use super::{
    diff::{self, TrackedPrinter},
    models::{MonitorConfig, PrinterEvent, PrinterStateSnapshot, SubscriptionId},
};

/// Receives every event the monitor detects. Returned errors are logged and do not
/// affect other subscribers.
pub type EventCallback = Arc<dyn Fn(&PrinterEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: BTreeMap<SubscriptionId, EventCallback>,
    poller: Option<JoinHandle<()>>,
    /// Set by an explicit start; keeps the poller alive without subscribers.
    pinned: bool,
}

struct Shared {
    backend: Arc<dyn PrintBackend>,
    registry: Mutex<Registry>,
    snapshots: RwLock<HashMap<String, TrackedPrinter>>,
    poll_interval_ms: AtomicU64,
    next_subscription_id: AtomicU64,
    /// Serialises poller start-up so concurrent subscribers never spawn two pollers.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::Relaxed))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        if registry.subscribers.remove(&id).is_none() {
            return false;
        }
        debug!("Subscription {id} removed");
        if registry.subscribers.is_empty() && !registry.pinned {
            if let Some(poller) = registry.poller.take() {
                poller.abort();
                info!("Printer monitor stopped: no subscribers left");
            }
        }
        true
    }

    async fn poll_cycle(&self) {
        let printers = match self.backend.list_printers().await {
            Ok(printers) => printers,
            Err(err) => {
                warn!("Printer poll failed, keeping previous snapshots: {err}");
                return;
            }
        };

        let events = {
            let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
            diff::apply_poll(&mut snapshots, &printers, Utc::now())
        };
        if events.is_empty() {
            return;
        }

        let subscribers: Vec<(SubscriptionId, EventCallback)> =
            self.registry().subscribers.iter().map(|(id, callback)| (*id, Arc::clone(callback))).collect();
        for event in &events {
            debug!("Printer '{}': {:?}", event.printer_name, event.kind);
            for (id, callback) in &subscribers {
                deliver(*id, callback, event);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = registry.poller.take() {
            poller.abort();
        }
    }
}

fn deliver(id: SubscriptionId, callback: &EventCallback, event: &PrinterEvent) {
    match catch_unwind(AssertUnwindSafe(|| (**callback)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Subscriber {id} failed to handle {:?} for '{}': {err:#}", event.kind, event.printer_name),
        Err(_) => error!("Subscriber {id} panicked while handling {:?} for '{}'", event.kind, event.printer_name),
    }
}

fn interval_millis(interval: Duration) -> Result<u64, PrintError> {
    u64::try_from(interval.as_millis()).ok().context(InvalidConfigurationSnafu {
        message: format!("poll interval {} is too long", humantime::format_duration(interval)),
    })
}

async fn run_poller(shared: Weak<Shared>, first_interval: Duration) {
    let mut interval = first_interval;
    loop {
        sleep(interval).await;
        let Some(shared) = shared.upgrade() else { return };
        shared.poll_cycle().await;
        // A changed interval takes effect from the next cycle on.
        interval = shared.poll_interval();
    }
}

/// Watches all printers for connectivity and state changes.
///
/// A single poller runs while at least one subscription exists (or after an explicit
/// [`start_monitoring`](PrinterMonitor::start_monitoring)). The first poll after a start
/// only records a baseline; later polls are diffed against it and the resulting events
/// are delivered synchronously to every subscriber in subscription order.
#[derive(Clone)]
pub struct PrinterMonitor {
    shared: Arc<Shared>,
}

impl PrinterMonitor {
    pub fn new(backend: Arc<dyn PrintBackend>, config: MonitorConfig) -> Result<Self, PrintError> {
        validate_poll_interval(config.poll_interval)?;
        let poll_interval_ms = interval_millis(config.poll_interval)?;
        Ok(PrinterMonitor {
            shared: Arc::new(Shared {
                backend,
                registry: Mutex::new(Registry::default()),
                snapshots: RwLock::new(HashMap::new()),
                poll_interval_ms: AtomicU64::new(poll_interval_ms),
                next_subscription_id: AtomicU64::new(1),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Registers `callback`, starting the poller (and its baseline poll) if it was stopped.
    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PrinterEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.shared.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.shared.registry().subscribers.insert(id, Arc::new(callback));
        debug!("Subscription {id} added");
        self.ensure_running().await;
        Subscription { id, shared: Arc::downgrade(&self.shared) }
    }

    /// Same as [`Subscription::unsubscribe`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.unsubscribe(id)
    }

    /// Starts polling even without subscribers, optionally with a new configuration.
    pub async fn start_monitoring(&self, config: Option<MonitorConfig>) -> Result<(), PrintError> {
        if let Some(config) = config {
            self.set_poll_interval(config.poll_interval)?;
        }
        self.shared.registry().pinned = true;
        self.ensure_running().await;
        Ok(())
    }

    /// Stops the poller and drops every subscription.
    pub fn stop_monitoring(&self) {
        let mut registry = self.shared.registry();
        registry.pinned = false;
        let dropped = std::mem::take(&mut registry.subscribers).len();
        if let Some(poller) = registry.poller.take() {
            poller.abort();
            info!("Printer monitor stopped, {dropped} subscription(s) dropped");
        }
    }

    pub fn is_monitoring_active(&self) -> bool {
        self.shared.registry().poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().subscribers.len()
    }

    /// Changes the time between polls. The cycle already waiting keeps its old interval.
    pub fn set_poll_interval(&self, interval: Duration) -> Result<(), PrintError> {
        validate_poll_interval(interval)?;
        self.shared.poll_interval_ms.store(interval_millis(interval)?, Ordering::Relaxed);
        debug!("Poll interval set to {}", humantime::format_duration(interval));
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval()
    }

    /// The snapshots of the most recent completed poll, keyed by printer name.
    pub fn get_snapshots(&self) -> HashMap<String, PrinterStateSnapshot> {
        self.shared
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, tracked)| (name.clone(), tracked.snapshot.clone()))
            .collect()
    }

    async fn ensure_running(&self) {
        let _starting = self.shared.lifecycle.lock().await;
        if self.is_monitoring_active() {
            return;
        }

        match self.shared.backend.list_printers().await {
            Ok(printers) => {
                *self.shared.snapshots.write().unwrap_or_else(PoisonError::into_inner) = diff::baseline(&printers, Utc::now());
            }
            Err(err) => {
                warn!("Baseline printer poll failed: {err}");
                self.shared.snapshots.write().unwrap_or_else(PoisonError::into_inner).clear();
            }
        }

        let mut registry = self.shared.registry();
        if registry.subscribers.is_empty() && !registry.pinned {
            // Everyone left while the baseline was taken.
            return;
        }
        let interval = self.shared.poll_interval();
        registry.poller = Some(tokio::spawn(run_poller(Arc::downgrade(&self.shared), interval)));
        info!("Printer monitor started, polling every {}", humantime::format_duration(interval));
    }
}

/// Handle returned by [`PrinterMonitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the subscription. Returns `true` the first time, `false` afterwards.
    pub fn unsubscribe(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.unsubscribe(self.id))
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").field("poll_interval", &self.poll_interval()).finish_non_exhaustive()
    }
}
