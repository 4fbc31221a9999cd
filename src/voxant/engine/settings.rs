// SPDX-License-Identifier: MIT

//! Engine-wide settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ROUND_LIMIT: u64 = 25;
pub const DEFAULT_BUFFER: usize = 256;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RUN_HISTORY: usize = 100;

/// Limits and buffer sizes shared by every run of an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Rounds a run may take before failing with round-limit-exceeded
    pub round_limit: u64,
    /// How far a run's event subscriber may fall behind before it is dropped
    pub event_buffer: usize,
    /// Same bound for topic subscribers
    pub topic_buffer: usize,
    /// How long `stop()` waits for background tasks
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Wall-clock limit per run
    #[serde(rename = "run_timeout_ms", with = "option_duration_ms")]
    pub run_timeout: Option<Duration>,
    /// Finished runs an executor keeps handles for; in-flight runs are
    /// always kept
    pub run_history: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            round_limit: DEFAULT_ROUND_LIMIT,
            event_buffer: DEFAULT_BUFFER,
            topic_buffer: DEFAULT_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            run_timeout: None,
            run_history: DEFAULT_RUN_HISTORY,
        }
    }
}

impl ExecutorSettings {
    /// Defaults overlaid with `VOXANT_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`; unparsable values are
    /// skipped with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = parse_var::<u64>(&lookup, "VOXANT_ROUND_LIMIT") {
            settings.round_limit = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "VOXANT_EVENT_BUFFER") {
            settings.event_buffer = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "VOXANT_TOPIC_BUFFER") {
            settings.topic_buffer = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "VOXANT_SHUTDOWN_TIMEOUT_MS") {
            settings.shutdown_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "VOXANT_RUN_TIMEOUT_MS") {
            settings.run_timeout = Some(Duration::from_millis(v));
        }
        if let Some(v) = parse_var::<usize>(&lookup, "VOXANT_RUN_HISTORY") {
            settings.run_history = v;
        }
        settings
    }

    pub fn with_round_limit(mut self, limit: u64) -> Self {
        self.round_limit = limit;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    pub fn with_topic_buffer(mut self, size: usize) -> Self {
        self.topic_buffer = size;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_run_history(mut self, runs: usize) -> Self {
        self.run_history = runs;
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring invalid value for {}: '{}'", key, raw);
            None
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
