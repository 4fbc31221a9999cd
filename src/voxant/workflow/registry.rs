// SPDX-License-Identifier: MIT

//! Named tasks that workflow definitions can refer to

use crate::sdk::task::Task;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, Arc<dyn Task>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry preloaded with the built-in tasks
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        crate::voxant::tasks::register_builtins(&registry).await;
        registry
    }

    /// Register `task` under `name`, replacing any previous entry
    pub async fn register(&self, name: impl Into<String>, task: Arc<dyn Task>) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(name.into(), task);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        let tasks = self.tasks.read().await;
        tasks.get(name).cloned()
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
