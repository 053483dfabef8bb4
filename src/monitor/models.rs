use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::PrinterState;

pub type SubscriptionId = u64;

/// Default time between two poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Last observed state of one printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterStateSnapshot {
    pub printer_name: String,
    pub state: PrinterState,
    pub state_reasons: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrinterEventKind {
    Connected,
    Disconnected,
    StateChanged { old_state: PrinterState, new_state: PrinterState },
    StateReasonsChanged { old_reasons: Vec<String>, new_reasons: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterEvent {
    pub printer_name: String,
    #[serde(flatten)]
    pub kind: PrinterEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig { poll_interval: DEFAULT_POLL_INTERVAL }
    }
}
