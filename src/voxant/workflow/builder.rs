// SPDX-License-Identifier: MIT

//! Workflow builder - compiles definitions into executable contexts
//!
//! This module provides the high-level Builder that loads workflow
//! definitions, resolves their task references and validates the result.

use std::time::Duration;

use crate::sdk::error::{VoxantError, WorkflowError};
use crate::sdk::step::Step;
use crate::voxant::engine::settings::ExecutorSettings;
use crate::voxant::engine::Executor;
use crate::voxant::workflow::context::Context;
use crate::voxant::workflow::graph::Workflow;
use crate::voxant::workflow::loader::WorkflowLoader;
use crate::voxant::workflow::registry::TaskRegistry;
use crate::voxant::workflow::types::{SettingsDefinition, WorkflowDefinition};

/// A compiled definition plus its settings overrides
pub struct CompiledWorkflow {
    pub context: Context,
    pub settings: SettingsDefinition,
}

impl CompiledWorkflow {
    /// Executor over this workflow, with its overrides applied to `base`
    pub fn into_executor(self, base: ExecutorSettings) -> Executor {
        let settings = self.settings.apply(base);
        Executor::new(self.context, settings)
    }
}

/// High-level builder for constructing workflows from YAML definitions
pub struct Builder {
    loader: WorkflowLoader,
    registry: TaskRegistry,
}

impl Builder {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            loader: WorkflowLoader::new(),
            registry,
        }
    }

    /// Build a workflow from a YAML file path
    pub async fn build(&self, file_path: &str) -> Result<CompiledWorkflow, VoxantError> {
        let def = self.loader.load_workflow(file_path)?;
        self.build_from_def(def).await
    }

    /// Build a workflow from a parsed definition
    pub async fn build_from_def(&self, def: WorkflowDefinition) -> Result<CompiledWorkflow, VoxantError> {
        let mut workflow = Workflow::new(def.name.clone()).allow_cycles(def.allow_cycles);

        for step_def in &def.steps {
            let task = self.registry.get(&step_def.task).await.ok_or_else(|| {
                WorkflowError::UnknownTask {
                    step: step_def.name.clone(),
                    task: step_def.task.clone(),
                }
            })?;

            let mut step = Step::new(step_def.name.clone(), task)
                .reads(step_def.reads.to_vec())
                .writes(step_def.writes.to_vec())
                .params(step_def.params.clone());
            if step_def.entry {
                step = step.entry();
            }
            if let Some(retry) = &step_def.retry {
                step = step.retry(retry.to_policy());
            }
            if let Some(ms) = step_def.timeout_ms {
                step = step.timeout(Duration::from_millis(ms));
            }
            workflow = workflow.step(step);
        }

        let context = Context::new(def.state, def.config, workflow)?;
        log::info!(
            "Built workflow '{}' with {} steps",
            context.name(),
            context.steps().len()
        );

        Ok(CompiledWorkflow {
            context,
            settings: def.settings,
        })
    }
}

/// Shortcut: builder over the built-in tasks
pub async fn builtin_builder() -> Builder {
    Builder::new(TaskRegistry::with_builtins().await)
}
