pub mod diff;
pub mod models;
pub mod monitor;

pub use monitor::{EventCallback, PrinterMonitor, Subscription};
