use std::{fmt::Formatter, str::FromStr, time::Duration};

use chrono::Local;
use croner::Cron;
use serde::{de::{self, Visitor}, Deserialize};
use snafu::{OptionExt, ResultExt, Snafu};

/// When a recurring task (such as job cleanup) should run next.
#[derive(Debug, Clone)]
pub enum TimeSchedule {
    Interval(Duration),
    Cron(Cron),
}

impl TimeSchedule {
    pub fn get_duration_till_next_occurrence(&self) -> Result<Duration, ScheduleError> {
        match self {
            TimeSchedule::Cron(cron) => {
                let now = Local::now();
                let next_occurrence = cron.find_next_occurrence(&now, false).with_whatever_context(|_| format!("Could not resolve next occurrence from cron {cron}"))?;
                (next_occurrence - now).to_std().with_whatever_context(|_| "Could not convert TimeDelta to Duration")
            },
            TimeSchedule::Interval(duration) => {
                (!duration.is_zero()).then_some(*duration).whatever_context("Interval schedules must be longer than zero")
            },
        }
    }
}

impl FromStr for TimeSchedule {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // First try parsing as cron syntax. `Cron::new` alone accepts anything.
        if let Ok(cron) = Cron::new(value).parse() {
            return Ok(TimeSchedule::Cron(cron));
        }

        // Now try humantime (e.g. '30m' for 30 minutes).
        humantime::parse_duration(value)
            .map(TimeSchedule::Interval)
            .with_whatever_context(|_| format!("Invalid time schedule string: '{value}'"))
    }
}

impl<'de> Deserialize<'de> for TimeSchedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: serde::Deserializer<'de> {
        struct TimeScheduleVisitor;

        impl<'de> Visitor<'de> for TimeScheduleVisitor {
            type Value = TimeSchedule;

            fn expecting(&self, formatter: &mut Formatter) -> Result<(), std::fmt::Error> {
                formatter.write_str("a cron expression or a duration string")
            }

            fn visit_str<E>(self, value: &str) -> Result<TimeSchedule, E>
            where
                E: de::Error,
            {
                TimeSchedule::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(TimeScheduleVisitor)
    }
}

// ////// //
// Errors //
// ////// //

#[derive(Debug, Snafu)]
pub enum ScheduleError {
    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}
