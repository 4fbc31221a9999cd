// SPDX-License-Identifier: MIT

//! Built-in tasks available to workflow definitions

pub mod messaging;
pub mod state;

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::sdk::error::StepFailure;
use crate::sdk::task::{StepInput, Task};
use crate::voxant::workflow::registry::TaskRegistry;

/// Every built-in task under its registry name
pub fn create_tasks() -> Vec<(&'static str, Arc<dyn Task>)> {
    vec![
        ("set", Arc::new(state::SetTask) as Arc<dyn Task>),
        ("copy", Arc::new(state::CopyTask) as Arc<dyn Task>),
        ("increment", Arc::new(state::IncrementTask) as Arc<dyn Task>),
        ("emit", Arc::new(messaging::EmitTask) as Arc<dyn Task>),
        ("publish", Arc::new(messaging::PublishTask) as Arc<dyn Task>),
    ]
}

pub async fn register_builtins(registry: &TaskRegistry) {
    for (name, task) in create_tasks() {
        log::debug!("Registered task: {}", name);
        registry.register(name, task).await;
    }
}

/// Parse the step's params; malformed params are not worth retrying
pub(crate) fn params<T: DeserializeOwned>(input: &StepInput) -> Result<T, StepFailure> {
    serde_json::from_value((*input.params).clone()).map_err(|e| {
        StepFailure::fatal(format!("invalid params for step '{}': {}", input.step, e))
    })
}
