// SPDX-License-Identifier: MIT

//! Executor façade
//!
//! Binds one compiled workflow [`Context`] to any number of concurrent runs
//! and owns the process-wide pieces: the [`TopicBus`] and the
//! [`BackgroundTaskManager`].

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::sdk::error::{ConfigValidationError, VoxantError};
use crate::sdk::hooks::{LogHooks, StepHooks};
use crate::sdk::task::Record;
use crate::voxant::background::{BackgroundTask, BackgroundTaskManager, ShutdownReport, TaskStatus};
use crate::voxant::bus::{TopicBus, TopicSubscription};
use crate::voxant::engine::events::EventSink;
use crate::voxant::engine::run::{lock, InvocationLog, RunHandle, RunId, RunStatus};
use crate::voxant::engine::scheduler::{RunLimits, Scheduler};
use crate::voxant::engine::settings::ExecutorSettings;
use crate::voxant::workflow::context::Context;

pub struct Executor {
    context: Arc<Context>,
    settings: ExecutorSettings,
    topics: TopicBus,
    background: BackgroundTaskManager,
    hooks: Arc<dyn StepHooks>,
    runs: Mutex<Vec<RunHandle>>,
}

impl Executor {
    pub fn new(context: Context, settings: ExecutorSettings) -> Self {
        let topics = TopicBus::new(settings.topic_buffer);
        let background = BackgroundTaskManager::new(settings.shutdown_timeout);
        Self {
            context: Arc::new(context),
            settings,
            topics,
            background,
            hooks: Arc::new(LogHooks),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Share a topic bus with other executors
    pub fn with_topics(mut self, topics: TopicBus) -> Self {
        self.topics = topics;
        self
    }

    /// Replace the default logging hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn StepHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register a background task; names must be unique
    pub fn with_background_task(mut self, task: Arc<dyn BackgroundTask>) -> Result<Self, VoxantError> {
        self.background.register(task)?;
        Ok(self)
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn topics(&self) -> &TopicBus {
        &self.topics
    }

    /// Start background tasks. Runs do not depend on this.
    pub async fn start(&self) -> Result<(), VoxantError> {
        log::info!(
            "Starting executor for '{}' with {} background task(s)",
            self.context.name(),
            self.background.len()
        );
        self.background.start(&self.topics).await
    }

    /// Stop background tasks. In-flight runs keep going.
    pub async fn stop(&self) -> ShutdownReport {
        let report = self.background.stop().await;
        if !report.is_clean() {
            log::warn!(
                "Unclean shutdown: {} task(s) were aborted",
                report.unclean.len()
            );
        }
        report
    }

    /// Validate `config` and start a new run without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, config: Value) -> Result<RunHandle, ConfigValidationError> {
        let config = self.context.validate_config(&config)?;
        let id = RunId::new();

        let (sink, first_events) = EventSink::channel(id.to_string(), self.settings.event_buffer);
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);
        let (state_tx, state_rx) = watch::channel(Arc::new(Record::new()));
        let invocations = InvocationLog::default();
        let cancel = CancellationToken::new();

        let handle = RunHandle::new(
            id,
            self.context.name(),
            status_rx,
            state_rx,
            invocations.clone(),
            cancel.clone(),
            first_events,
        );

        let scheduler = Scheduler {
            run_id: id,
            context: self.context.clone(),
            config: Arc::new(config),
            limits: RunLimits {
                round_limit: self.settings.round_limit,
                run_timeout: self.settings.run_timeout,
            },
            topics: self.topics.clone(),
            hooks: self.hooks.clone(),
            cancel,
            events: sink,
            status: status_tx,
            state: state_tx,
            invocations,
        };
        let finished = handle.clone();
        tokio::spawn(async move {
            scheduler.run().await;
            finished.release_events();
        });

        log::info!("Created run {} of '{}'", id, self.context.name());
        let mut runs = lock(&self.runs);
        runs.push(handle.clone());
        prune_finished(&mut runs, self.settings.run_history);
        Ok(handle)
    }

    /// Subscribe to `topic` from now on
    pub async fn recv(&self, topic: &str) -> TopicSubscription {
        self.topics.recv(topic).await
    }

    /// Publish to `topic`; returns the number of subscribers reached
    pub async fn emit(&self, topic: &str, message: Value) -> usize {
        self.topics.emit(topic, message).await
    }

    /// In-flight runs plus the most recent finished ones, oldest first
    pub fn runs(&self) -> Vec<RunHandle> {
        let mut runs = lock(&self.runs);
        prune_finished(&mut runs, self.settings.run_history);
        runs.clone()
    }

    pub fn run(&self, id: RunId) -> Option<RunHandle> {
        lock(&self.runs).iter().find(|h| h.id() == id).cloned()
    }

    pub async fn background_status(&self) -> BTreeMap<String, TaskStatus> {
        self.background.status().await
    }
}

/// Drop the oldest finished runs until at most `keep` remain
fn prune_finished(runs: &mut Vec<RunHandle>, keep: usize) {
    let finished = runs.iter().filter(|h| h.is_finished()).count();
    let mut excess = finished.saturating_sub(keep);
    if excess == 0 {
        return;
    }
    runs.retain(|h| {
        if excess > 0 && h.is_finished() {
            excess -= 1;
            false
        } else {
            true
        }
    });
    log::debug!("Pruned finished runs; {} handle(s) retained", runs.len());
}
