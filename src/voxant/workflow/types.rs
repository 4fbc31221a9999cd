// SPDX-License-Identifier: MIT

//! YAML schema types for step graph definitions
//!
//! This module contains the data structures used for parsing workflow
//! definition files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::sdk::retry::RetryPolicy;
use crate::voxant::engine::settings::ExecutorSettings;
use crate::voxant::workflow::state::{ConfigSchema, StateSchema};

/// Top-level workflow definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shared state fields
    #[serde(default)]
    pub state: StateSchema,
    /// Per-run config fields
    #[serde(default)]
    pub config: ConfigSchema,
    #[serde(default)]
    pub settings: SettingsDefinition,
    /// Permit write -> read cycles between steps
    #[serde(default)]
    pub allow_cycles: bool,
    pub steps: Vec<StepDefinition>,
}

/// Per-workflow overrides of the executor settings
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SettingsDefinition {
    pub round_limit: Option<u64>,
    pub run_timeout_ms: Option<u64>,
}

impl SettingsDefinition {
    pub fn apply(&self, mut settings: ExecutorSettings) -> ExecutorSettings {
        if let Some(limit) = self.round_limit {
            settings.round_limit = limit;
        }
        if let Some(ms) = self.run_timeout_ms {
            settings.run_timeout = Some(Duration::from_millis(ms));
        }
        settings
    }
}

/// A step in a workflow definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StepDefinition {
    /// Unique step name
    pub name: String,
    /// Registered task to run
    pub task: String,
    /// Static parameters for the task
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub reads: FieldList,
    #[serde(default)]
    pub writes: FieldList,
    /// Runs in round 0
    #[serde(default)]
    pub entry: bool,
    pub retry: Option<RetryDefinition>,
    /// Per-attempt timeout
    pub timeout_ms: Option<u64>,
}

/// Field list (single string or array)
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(untagged)]
pub enum FieldList {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl FieldList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            FieldList::None => vec![],
            FieldList::Single(s) => vec![s.clone()],
            FieldList::Multiple(v) => v.clone(),
        }
    }
}

/// Retry settings; unset values take the policy defaults
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryDefinition {
    pub max_attempts: u32,
    pub initial_interval_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_interval_ms: Option<u64>,
    pub jitter: Option<bool>,
}

impl RetryDefinition {
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new(self.max_attempts);
        if let Some(ms) = self.initial_interval_ms {
            policy = policy.with_initial_interval(Duration::from_millis(ms));
        }
        if let Some(factor) = self.backoff_factor {
            policy = policy.with_backoff_factor(factor);
        }
        if let Some(ms) = self.max_interval_ms {
            policy = policy.with_max_interval(Duration::from_millis(ms));
        }
        if let Some(jitter) = self.jitter {
            policy = policy.with_jitter(jitter);
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_list_none() {
        assert!(FieldList::None.to_vec().is_empty());
    }

    #[test]
    fn test_field_list_single() {
        let list: FieldList = serde_yaml::from_str("x").unwrap();
        assert_eq!(list.to_vec(), vec!["x"]);
    }

    #[test]
    fn test_field_list_multiple() {
        let list: FieldList = serde_yaml::from_str("[a, b]").unwrap();
        assert_eq!(list.to_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_retry_definition_to_policy() {
        let def: RetryDefinition =
            serde_yaml::from_str("max_attempts: 4\ninitial_interval_ms: 0\njitter: false\n").unwrap();
        let policy = def.to_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_interval, Duration::ZERO);
        assert!(!policy.jitter);
        assert_eq!(policy.backoff_factor, 2.0);
    }

    #[test]
    fn test_settings_apply() {
        let def = SettingsDefinition {
            round_limit: Some(3),
            run_timeout_ms: None,
        };
        let settings = def.apply(ExecutorSettings::default());
        assert_eq!(settings.round_limit, 3);
        assert!(settings.run_timeout.is_none());
    }
}
