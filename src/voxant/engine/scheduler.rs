// SPDX-License-Identifier: MIT

//! Superstep scheduler
//!
//! Drives one run through bulk-synchronous rounds:
//! 1. round 0 activates the entry steps; later rounds activate every step
//!    that reads a field the previous round changed
//! 2. active steps run concurrently against the same state snapshot
//! 3. successful updates are merged in declaration order through each
//!    field's reducer, then the diff and custom messages are published
//! 4. a step giving up fails the run; an empty next active set completes it

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::sdk::error::{FailureReason, RunFailure, StepFailure};
use crate::sdk::hooks::StepHooks;
use crate::sdk::step::{InvocationOutcome, InvocationReport, StepInvocation};
use crate::sdk::task::{Record, StepInput};
use crate::voxant::bus::TopicBus;
use crate::voxant::engine::events::{Event, EventSink};
use crate::voxant::engine::run::{lock, CancelReason, InvocationLog, RunId, RunStatus};
use crate::voxant::workflow::context::Context;
use crate::voxant::workflow::state::StateStore;

/// Per-run limits
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunLimits {
    pub round_limit: u64,
    pub run_timeout: Option<std::time::Duration>,
}

/// Everything the scheduler needs to drive one run. Consumed by `run`.
pub(crate) struct Scheduler {
    pub run_id: RunId,
    pub context: Arc<Context>,
    pub config: Arc<Record>,
    pub limits: RunLimits,
    pub topics: TopicBus,
    pub hooks: Arc<dyn StepHooks>,
    pub cancel: CancellationToken,
    pub events: EventSink,
    pub status: watch::Sender<RunStatus>,
    pub state: watch::Sender<Arc<Record>>,
    pub invocations: InvocationLog,
}

/// What the round loop decided
enum RoundResult {
    Continue(Vec<usize>),
    Finished(RunStatus),
}

impl Scheduler {
    /// Drive the run to a terminal status.
    ///
    /// The terminal status is published before the event stream closes, so a
    /// consumer that sees its stream end can read the final status.
    pub(crate) async fn run(self) -> RunStatus {
        log::info!(
            "[run {}] starting workflow '{}'",
            self.run_id,
            self.context.name()
        );
        let deadline = self.limits.run_timeout.map(|t| Instant::now() + t);
        let status = self.drive(deadline).await;

        match &status {
            RunStatus::Failed(reason) => log::warn!("[run {}] failed: {}", self.run_id, reason),
            other => log::info!("[run {}] {}", self.run_id, other),
        }
        self.status.send_replace(status.clone());
        // Dropping the sink closes every event subscriber
        drop(self);
        status
    }

    async fn drive(&self, deadline: Option<Instant>) -> RunStatus {
        let mut store = StateStore::new(self.context.state_schema().clone());
        self.state.send_replace(store.snapshot());

        let mut active: Vec<usize> = self
            .context
            .steps()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.step().entry)
            .map(|(i, _)| i)
            .collect();
        let mut round: u64 = 0;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.cancel.cancel();
                return RunStatus::Cancelled(CancelReason::Timeout);
            }
            if self.cancel.is_cancelled() {
                return RunStatus::Cancelled(CancelReason::Requested);
            }
            if round >= self.limits.round_limit {
                return RunStatus::Failed(FailureReason::RoundLimitExceeded {
                    limit: self.limits.round_limit,
                });
            }

            self.status.send_replace(RunStatus::Running { round });
            match self.run_round(round, &active, &mut store, deadline).await {
                RoundResult::Continue(next) => {
                    active = next;
                    round += 1;
                }
                RoundResult::Finished(status) => return status,
            }
        }
    }

    async fn run_round(
        &self,
        round: u64,
        active: &[usize],
        store: &mut StateStore,
        deadline: Option<Instant>,
    ) -> RoundResult {
        let steps = self.context.steps();
        log::info!(
            "[run {}] round {}: executing {} step(s): {:?}",
            self.run_id,
            round,
            active.len(),
            active.iter().map(|&i| steps[i].name()).collect::<Vec<_>>()
        );

        let snapshot = store.snapshot();
        let run_id = self.run_id.to_string();
        let handles: Vec<_> = active
            .iter()
            .map(|&i| {
                let step = steps[i].clone();
                let hooks = self.hooks.clone();
                let run_id = run_id.clone();
                let input = StepInput {
                    step: step.name().to_string(),
                    round,
                    attempt: 1,
                    state: snapshot.clone(),
                    config: self.config.clone(),
                    params: step.step().params.clone(),
                    topics: self.topics.clone(),
                    cancel: self.cancel.child_token(),
                };
                tokio::spawn(async move { step.invoke(input, hooks.as_ref(), &run_id).await })
            })
            .collect();

        let joined = join_all(handles);
        tokio::pin!(joined);
        let mut timed_out = false;
        let results = tokio::select! {
            results = &mut joined => results,
            _ = until(deadline) => {
                log::warn!("[run {}] run timeout reached during round {}", self.run_id, round);
                timed_out = true;
                self.cancel.cancel();
                joined.await
            }
        };

        let reports: Vec<InvocationReport> = active
            .iter()
            .zip(results)
            .map(|(&i, result)| {
                // Task panics are caught per attempt; this only sees panics
                // escaping the attempt loop itself
                result.unwrap_or_else(|join_err| InvocationReport {
                    outcome: InvocationOutcome::GaveUp(RunFailure {
                        step: steps[i].name().to_string(),
                        attempts: 1,
                        error: StepFailure::panicked(join_err.to_string()),
                    }),
                    attempts: Vec::new(),
                })
            })
            .collect();
        self.record(reports.iter().flat_map(|r| r.attempts.iter().cloned()));

        // A cancelled round is discarded whole
        if self.cancel.is_cancelled() {
            let reason = if timed_out {
                CancelReason::Timeout
            } else {
                CancelReason::Requested
            };
            return RoundResult::Finished(RunStatus::Cancelled(reason));
        }

        let mut updates = Vec::new();
        let mut messages = Vec::new();
        let mut failure: Option<RunFailure> = None;
        for report in reports {
            match report.outcome {
                InvocationOutcome::Completed(output) => {
                    updates.push(output.update);
                    messages.extend(output.messages);
                }
                InvocationOutcome::GaveUp(f) => {
                    failure.get_or_insert(f);
                }
                InvocationOutcome::Cancelled => {}
            }
        }

        let diff = store.merge(round, &updates);
        self.state.send_replace(store.snapshot());
        log::debug!(
            "[run {}] round {} merged {} update(s), {} field(s) changed",
            self.run_id,
            round,
            updates.len(),
            diff.len()
        );

        let changed: BTreeSet<String> = diff.keys().cloned().collect();
        if !diff.is_empty() {
            self.events.publish(Event::Updates {
                round,
                payload: diff,
            });
        }
        for payload in messages {
            self.events.publish(Event::Custom { round, payload });
        }

        if let Some(failure) = failure {
            return RoundResult::Finished(RunStatus::Failed(FailureReason::StepFailed(failure)));
        }

        let next: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.step().is_triggered_by(&changed))
            .map(|(i, _)| i)
            .collect();
        if next.is_empty() {
            return RoundResult::Finished(RunStatus::Completed { rounds: round + 1 });
        }
        RoundResult::Continue(next)
    }

    fn record(&self, attempts: impl Iterator<Item = StepInvocation>) {
        lock(&self.invocations).extend(attempts);
    }
}

/// Resolve at `deadline`, or never
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
