//! Print job tracking and printer state monitoring over CUPS, with a deterministic
//! simulation backend for tests.

pub mod backend;
pub mod config;
pub mod cups_client;
pub mod error;
pub mod jobs;
pub mod monitor;
pub mod printer;
pub mod report;
pub mod service;
pub mod simulation;

pub use error::PrintError;
pub use jobs::models::{JobId, JobState, PrintJob, PrintOptions};
pub use printer::PrinterHandle;
pub use service::{PrintService, ServiceOptions};
