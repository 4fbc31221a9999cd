// SPDX-License-Identifier: MIT

//! The user-supplied computation wrapped by a step.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::sdk::error::StepFailure;
use crate::voxant::bus::TopicBus;

/// A typed record as stored in state and config: field name -> value
pub type Record = Map<String, Value>;

/// Everything a task sees during one attempt.
///
/// State and config are read-only snapshots shared with the other steps of
/// the round; the only way to change state is through the returned
/// [`StepOutput`].
#[derive(Clone)]
pub struct StepInput {
    pub step: String,
    pub round: u64,
    pub attempt: u32,
    pub state: Arc<Record>,
    pub config: Arc<Record>,
    pub params: Arc<Value>,
    pub topics: TopicBus,
    pub cancel: CancellationToken,
}

impl StepInput {
    /// Read a state field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    /// Read a config field
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Read a step parameter (from the step definition)
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of a successful attempt: a partial state update plus custom
/// messages to publish on the run's event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub update: Record,
    pub messages: Vec<Value>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_update(update: Record) -> Self {
        Self {
            update,
            messages: Vec::new(),
        }
    }

    /// Write a field
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.update.insert(field.into(), value);
        self
    }

    /// Emit a custom message
    pub fn emit(mut self, message: Value) -> Self {
        self.messages.push(message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.messages.is_empty()
    }
}

/// Trait for the asynchronous computation run by a step.
///
/// Implementations must be stateless between invocations: every attempt
/// receives a fresh [`StepInput`]. Long-running tasks should watch
/// `input.cancel` and return early when it fires.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure>;
}

/// Adapter turning an async closure into a [`Task`]
pub struct TaskFn<F> {
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, StepFailure>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<dyn Task> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, StepFailure>> + Send + 'static,
{
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        (self.f)(input).await
    }
}
