// SPDX-License-Identifier: MIT

//! Binds a state schema and a config schema to a validated workflow.
//!
//! A `Context` is immutable once built and shared (behind an `Arc`) by every
//! run of its workflow.

use serde_json::Value;
use std::sync::Arc;

use crate::sdk::error::{ConfigValidationError, StepFailure, WorkflowError};
use crate::sdk::step::RetryingStep;
use crate::sdk::task::Record;
use crate::voxant::workflow::graph::Workflow;
use crate::voxant::workflow::state::{ConfigSchema, StateSchema};

pub struct Context {
    state_schema: Arc<StateSchema>,
    config_schema: Arc<ConfigSchema>,
    workflow: Workflow,
    steps: Vec<Arc<RetryingStep>>,
}

impl Context {
    /// Validate `workflow` against `state_schema` and compile its steps
    pub fn new(
        state_schema: StateSchema,
        config_schema: ConfigSchema,
        workflow: Workflow,
    ) -> Result<Self, WorkflowError> {
        workflow.validate(&state_schema)?;

        let state_schema = Arc::new(state_schema);
        let steps = workflow
            .steps()
            .iter()
            .map(|step| {
                let schema = state_schema.clone();
                Arc::new(
                    RetryingStep::new(step.clone()).with_output_check(move |output| {
                        for (field, value) in &output.update {
                            schema
                                .check_update(field, value)
                                .map_err(|e| StepFailure::invalid_output(e.to_string()))?;
                        }
                        Ok(())
                    }),
                )
            })
            .collect();

        log::debug!(
            "Compiled workflow '{}' with {} steps (entry: {:?})",
            workflow.name(),
            workflow.steps().len(),
            workflow.entry_steps()
        );

        Ok(Self {
            state_schema,
            config_schema: Arc::new(config_schema),
            workflow,
            steps,
        })
    }

    /// Validate a raw config into the typed record a run will see
    pub fn validate_config(&self, raw: &Value) -> Result<Record, ConfigValidationError> {
        Ok(self.config_schema.validate(raw)?)
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn name(&self) -> &str {
        self.workflow.name()
    }

    pub fn state_schema(&self) -> &Arc<StateSchema> {
        &self.state_schema
    }

    pub fn config_schema(&self) -> &Arc<ConfigSchema> {
        &self.config_schema
    }

    /// Compiled steps in declaration order
    pub fn steps(&self) -> &[Arc<RetryingStep>] {
        &self.steps
    }
}
