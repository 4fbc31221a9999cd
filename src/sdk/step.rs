// SPDX-License-Identifier: MIT

//! Steps: named, retryable wrappers around a [`Task`].
//!
//! A [`Step`] is the declarative descriptor (name, task, read/write fields,
//! retry policy). A [`RetryingStep`] owns the attempt loop: it runs the task,
//! checks its output, consults the retry policy and fires hooks around every
//! attempt. One `RetryingStep::invoke` call is one invocation; attempts within
//! it are strictly sequential.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sdk::error::{RunFailure, StepFailure};
use crate::sdk::hooks::{AttemptInfo, AttemptResult, StepHooks};
use crate::sdk::retry::{RetryDecision, RetryPolicy};
use crate::sdk::task::{StepInput, StepOutput, Task};

/// Declarative step descriptor
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub task: Arc<dyn Task>,
    /// State fields whose change activates this step in the next round
    pub reads: Vec<String>,
    /// State fields this step may write
    pub writes: Vec<String>,
    /// Runs in round 0
    pub entry: bool,
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Static parameters handed to the task on every attempt
    pub params: Arc<Value>,
}

impl Step {
    pub fn new(name: impl Into<String>, task: Arc<dyn Task>) -> Self {
        Self {
            name: name.into(),
            task,
            reads: Vec::new(),
            writes: Vec::new(),
            entry: false,
            retry: None,
            timeout: None,
            params: Arc::new(Value::Null),
        }
    }

    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn entry(mut self) -> Self {
        self.entry = true;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Whether any of the changed fields is one this step reads
    pub fn is_triggered_by(&self, changed: &BTreeSet<String>) -> bool {
        self.reads.iter().any(|f| changed.contains(f))
    }

    /// Whether this step may write `field`
    pub fn may_write(&self, field: &str) -> bool {
        self.writes.iter().any(|w| w == field)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("entry", &self.entry)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { failure: StepFailure },
    Cancelled,
}

/// Record of one execution attempt of a step within one round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInvocation {
    pub step: String,
    pub round: u64,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Terminal result of an invocation (all attempts)
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Completed(StepOutput),
    GaveUp(RunFailure),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub outcome: InvocationOutcome,
    pub attempts: Vec<StepInvocation>,
}

type OutputCheck = dyn Fn(&StepOutput) -> Result<(), StepFailure> + Send + Sync;

/// A step plus its attempt loop
pub struct RetryingStep {
    step: Step,
    output_check: Option<Arc<OutputCheck>>,
}

impl RetryingStep {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            output_check: None,
        }
    }

    /// Extra validation applied to every successful attempt's output
    pub fn with_output_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&StepOutput) -> Result<(), StepFailure> + Send + Sync + 'static,
    {
        self.output_check = Some(Arc::new(check));
        self
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn name(&self) -> &str {
        &self.step.name
    }

    fn check_output(&self, output: &StepOutput) -> Result<(), StepFailure> {
        if let Some(field) = output.update.keys().find(|k| !self.step.may_write(k)) {
            return Err(StepFailure::invalid_output(format!(
                "step '{}' wrote undeclared field '{}'",
                self.step.name, field
            )));
        }
        match &self.output_check {
            Some(check) => check(output),
            None => Ok(()),
        }
    }

    /// Run the task once; a panic becomes a `Panicked` failure of this attempt
    async fn run_task(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        match AssertUnwindSafe(self.step.task.run(input)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(StepFailure::panicked(panic_message(payload.as_ref()))),
        }
    }

    async fn attempt_once(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let output = match self.step.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_task(input)).await {
                Ok(result) => result?,
                Err(_) => return Err(StepFailure::timeout(limit)),
            },
            None => self.run_task(input).await?,
        };
        self.check_output(&output)?;
        Ok(output)
    }

    /// Run attempts until one succeeds, the retry policy gives up, or
    /// `base.cancel` fires.
    ///
    /// `base.attempt` is ignored; attempts are numbered from 1.
    pub async fn invoke(
        &self,
        base: StepInput,
        hooks: &dyn StepHooks,
        run_id: &str,
    ) -> InvocationReport {
        let cancel = base.cancel.clone();
        let mut attempts = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            let info = AttemptInfo {
                run_id: run_id.to_string(),
                step: self.step.name.clone(),
                round: base.round,
                attempt,
            };
            fire(|| hooks.before_attempt(&info));

            let mut input = base.clone();
            input.attempt = attempt;
            let started_at = Utc::now();
            let clock = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.attempt_once(input) => Some(r),
            };
            let elapsed = clock.elapsed();

            let mut record = |outcome: AttemptOutcome| {
                attempts.push(StepInvocation {
                    step: self.step.name.clone(),
                    round: base.round,
                    attempt,
                    started_at,
                    ended_at: Utc::now(),
                    outcome,
                })
            };

            let failure = match result {
                None => {
                    record(AttemptOutcome::Cancelled);
                    fire(|| hooks.after_attempt(&info, &AttemptResult::Cancelled));
                    return InvocationReport {
                        outcome: InvocationOutcome::Cancelled,
                        attempts,
                    };
                }
                Some(Ok(output)) => {
                    record(AttemptOutcome::Succeeded);
                    fire(|| hooks.after_attempt(&info, &AttemptResult::Succeeded { elapsed }));
                    return InvocationReport {
                        outcome: InvocationOutcome::Completed(output),
                        attempts,
                    };
                }
                Some(Err(failure)) => failure,
            };

            record(AttemptOutcome::Failed {
                failure: failure.clone(),
            });
            fire(|| {
                hooks.after_attempt(
                    &info,
                    &AttemptResult::Failed {
                        elapsed,
                        failure: failure.clone(),
                    },
                )
            });

            let decision = match &self.step.retry {
                Some(policy) => policy.decide(attempt, &failure),
                None => RetryDecision::GiveUp,
            };

            match decision {
                RetryDecision::GiveUp => {
                    log::warn!(
                        "Step '{}' gave up after {} attempt(s): {}",
                        self.step.name,
                        attempt,
                        failure
                    );
                    return InvocationReport {
                        outcome: InvocationOutcome::GaveUp(RunFailure {
                            step: self.step.name.clone(),
                            attempts: attempt,
                            error: failure,
                        }),
                        attempts,
                    };
                }
                RetryDecision::Retry { delay } => {
                    log::info!(
                        "Retrying step '{}' (attempt {}) in {:?}",
                        self.step.name,
                        attempt + 1,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return InvocationReport {
                                outcome: InvocationOutcome::Cancelled,
                                attempts,
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("step panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("step panicked: {}", s)
    } else {
        "step panicked".to_string()
    }
}

/// Run a hook, swallowing panics so observers cannot change control flow
fn fire<F: FnOnce()>(hook: F) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        log::error!("Step hook panicked; ignoring");
    }
}
