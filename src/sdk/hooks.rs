// SPDX-License-Identifier: MIT

//! Instrumentation hooks fired around every step attempt.
//!
//! Hooks are observers: they return nothing, so they can neither alter the
//! outcome of an attempt nor suppress a failure.

use std::time::Duration;

use crate::sdk::error::StepFailure;

/// Identifies one attempt of one step in one round of one run
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptInfo {
    pub run_id: String,
    pub step: String,
    pub round: u64,
    pub attempt: u32,
}

/// How an attempt ended, as seen by hooks
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Succeeded { elapsed: Duration },
    Failed { elapsed: Duration, failure: StepFailure },
    Cancelled,
}

pub trait StepHooks: Send + Sync {
    fn before_attempt(&self, _info: &AttemptInfo) {}

    fn after_attempt(&self, _info: &AttemptInfo, _result: &AttemptResult) {}
}

/// Hooks that do nothing
pub struct NoopHooks;

impl StepHooks for NoopHooks {}

/// Logs every attempt at debug level, failures at warn
pub struct LogHooks;

impl StepHooks for LogHooks {
    fn before_attempt(&self, info: &AttemptInfo) {
        log::debug!(
            "[run {}] round {} step '{}' attempt {} starting",
            info.run_id,
            info.round,
            info.step,
            info.attempt
        );
    }

    fn after_attempt(&self, info: &AttemptInfo, result: &AttemptResult) {
        match result {
            AttemptResult::Succeeded { elapsed } => log::debug!(
                "[run {}] round {} step '{}' attempt {} succeeded in {:?}",
                info.run_id,
                info.round,
                info.step,
                info.attempt,
                elapsed
            ),
            AttemptResult::Failed { elapsed, failure } => log::warn!(
                "[run {}] round {} step '{}' attempt {} failed after {:?}: {}",
                info.run_id,
                info.round,
                info.step,
                info.attempt,
                elapsed,
                failure
            ),
            AttemptResult::Cancelled => log::debug!(
                "[run {}] round {} step '{}' attempt {} cancelled",
                info.run_id,
                info.round,
                info.step,
                info.attempt
            ),
        }
    }
}
