use std::time::Duration;

use serde_derive::Deserialize;
use snafu::ensure;

use crate::error::{InvalidConfigurationSnafu, PrintError};

use super::schedule::TimeSchedule;

// When changing anything here, make sure to add
// #[serde(alias = "ihavenounderscores")]
// where needed, so it can be read from the ENV vars.

/// Smallest poll interval the printer state monitor accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct Cups {
    pub uri: String,
    #[serde(alias = "ignoretlserrors")]
    pub ignore_tls_errors: bool,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Monitor {
    #[serde(alias = "pollinterval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
pub struct Jobs {
    #[serde(alias = "waittimeout", with = "humantime_serde")]
    pub wait_timeout: Duration,
    #[serde(alias = "tracktimeout", with = "humantime_serde")]
    pub track_timeout: Duration,
    #[serde(alias = "maxage", with = "humantime_serde")]
    pub max_age: Duration,
    #[serde(alias = "cleanupschedule")]
    pub cleanup_schedule: TimeSchedule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Simulation {
    #[serde(alias = "startdelay", with = "humantime_serde")]
    pub start_delay: Duration,
    #[serde(alias = "completiondelay", with = "humantime_serde")]
    pub completion_delay: Duration,
    #[serde(alias = "statuspollinterval", with = "humantime_serde")]
    pub status_poll_interval: Duration,
    #[serde(alias = "failuremarker")]
    pub failure_marker: String,
    #[serde(alias = "missingmarkers")]
    pub missing_markers: Vec<String>,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            start_delay: Duration::from_millis(100),
            completion_delay: Duration::from_secs(2),
            status_poll_interval: Duration::from_millis(50),
            failure_marker: "fail-test".to_string(),
            missing_markers: vec!["nonexistent".to_string(), "does_not_exist".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub simulate: bool,
    pub cups: Cups,
    pub monitor: Monitor,
    pub jobs: Jobs,
    pub simulation: Simulation,
    #[serde(alias = "sentrydsn")]
    pub sentry_dsn: Option<String>,
}

impl Settings {
    pub fn validate(&self) -> Result<(), PrintError> {
        validate_poll_interval(self.monitor.poll_interval)?;
        ensure!(
            self.simulation.completion_delay >= self.simulation.start_delay,
            InvalidConfigurationSnafu {
                message: "simulation completion delay must not be shorter than its start delay"
            }
        );
        ensure!(
            !self.simulation.failure_marker.is_empty(),
            InvalidConfigurationSnafu { message: "simulation failure marker must not be empty" }
        );
        Ok(())
    }
}

pub fn validate_poll_interval(interval: Duration) -> Result<(), PrintError> {
    ensure!(
        interval >= MIN_POLL_INTERVAL,
        InvalidConfigurationSnafu {
            message: format!(
                "poll interval must be at least {}, got {}",
                humantime::format_duration(MIN_POLL_INTERVAL),
                humantime::format_duration(interval)
            )
        }
    );
    Ok(())
}
