// SPDX-License-Identifier: MIT

//! Long-lived tasks owned by an executor rather than by any run.
//!
//! `start()` spawns every registered task with a fresh cancellation token;
//! `stop()` cancels them and waits up to the shutdown timeout. Tasks that do
//! not finish in time are aborted and reported as unclean.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sdk::error::{ShutdownTimeout, VoxantError};
use crate::voxant::bus::TopicBus;

/// Handed to a background task when it starts
#[derive(Clone)]
pub struct TaskContext {
    /// Fires when the executor stops
    pub cancel: CancellationToken,
    pub topics: TopicBus,
}

#[async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `ctx.cancel` fires. Returning early is allowed.
    async fn run(&self, ctx: TaskContext) -> Result<(), VoxantError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, never started
    Idle,
    Running,
    /// Returned normally
    Stopped,
    /// Returned an error or panicked
    Failed(String),
    /// Force-terminated after the shutdown timeout
    Aborted,
}

/// Outcome of `stop()`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub clean: Vec<String>,
    pub unclean: Vec<ShutdownTimeout>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unclean.is_empty()
    }
}

type StatusMap = Arc<RwLock<BTreeMap<String, TaskStatus>>>;

#[derive(Default)]
struct Generation {
    cancel: Option<CancellationToken>,
    handles: Vec<(String, JoinHandle<()>)>,
}

pub struct BackgroundTaskManager {
    tasks: Vec<Arc<dyn BackgroundTask>>,
    shutdown_timeout: Duration,
    generation: Mutex<Generation>,
    statuses: StatusMap,
}

impl BackgroundTaskManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown_timeout,
            generation: Mutex::new(Generation::default()),
            statuses: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Add a task; names must be unique
    pub fn register(&mut self, task: Arc<dyn BackgroundTask>) -> Result<(), VoxantError> {
        let name = task.name().to_string();
        if self.tasks.iter().any(|t| t.name() == name) {
            return Err(VoxantError::DuplicateTask(name));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn is_running(&self) -> bool {
        self.generation.lock().await.cancel.is_some()
    }

    /// Spawn every registered task
    pub async fn start(&self, topics: &TopicBus) -> Result<(), VoxantError> {
        let mut generation = self.generation.lock().await;
        if generation.cancel.is_some() {
            return Err(VoxantError::AlreadyStarted);
        }

        let cancel = CancellationToken::new();
        for task in &self.tasks {
            let name = task.name().to_string();
            let ctx = TaskContext {
                cancel: cancel.child_token(),
                topics: topics.clone(),
            };
            self.set_status(&name, TaskStatus::Running).await;
            log::info!("Starting background task '{}'", name);

            let task = task.clone();
            let statuses = self.statuses.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let status = match AssertUnwindSafe(task.run(ctx)).catch_unwind().await {
                    Ok(Ok(())) => {
                        log::info!("Background task '{}' stopped", task_name);
                        TaskStatus::Stopped
                    }
                    Ok(Err(e)) => {
                        log::error!("Background task '{}' failed: {}", task_name, e);
                        TaskStatus::Failed(e.to_string())
                    }
                    Err(_) => {
                        log::error!("Background task '{}' panicked", task_name);
                        TaskStatus::Failed("panicked".to_string())
                    }
                };
                statuses.write().await.insert(task_name, status);
            });
            generation.handles.push((name, handle));
        }
        generation.cancel = Some(cancel);
        Ok(())
    }

    /// Cancel every task and wait for them, aborting stragglers.
    ///
    /// Stopping a manager that is not running returns an empty report.
    pub async fn stop(&self) -> ShutdownReport {
        let mut generation = self.generation.lock().await;
        let Some(cancel) = generation.cancel.take() else {
            return ShutdownReport::default();
        };
        cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();
        for (name, mut handle) in generation.handles.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.clean.push(name),
                Err(_) => {
                    handle.abort();
                    log::warn!(
                        "Background task '{}' did not stop within {:?}; aborted",
                        name,
                        self.shutdown_timeout
                    );
                    self.set_status(&name, TaskStatus::Aborted).await;
                    report.unclean.push(ShutdownTimeout {
                        task: name,
                        waited: self.shutdown_timeout,
                    });
                }
            }
        }
        report
    }

    /// Status of every registered task
    pub async fn status(&self) -> BTreeMap<String, TaskStatus> {
        let statuses = self.statuses.read().await;
        self.tasks
            .iter()
            .map(|t| {
                let status = statuses.get(t.name()).cloned().unwrap_or(TaskStatus::Idle);
                (t.name().to_string(), status)
            })
            .collect()
    }

    async fn set_status(&self, name: &str, status: TaskStatus) {
        self.statuses.write().await.insert(name.to_string(), status);
    }
}
