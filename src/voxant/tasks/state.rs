// SPDX-License-Identifier: MIT

//! Tasks that write state fields

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::params;
use crate::sdk::error::StepFailure;
use crate::sdk::task::{Record, StepInput, StepOutput, Task};

// --- Set ---

#[derive(Deserialize)]
struct SetArgs {
    values: Record,
}

/// Writes `params.values` as its update
pub struct SetTask;

#[async_trait]
impl Task for SetTask {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let args: SetArgs = params(&input)?;
        Ok(StepOutput::from_update(args.values))
    }
}

// --- Copy ---

#[derive(Deserialize)]
struct CopyArgs {
    from: String,
    to: String,
}

/// Copies state field `params.from` into `params.to`; no-op while unset
pub struct CopyTask;

#[async_trait]
impl Task for CopyTask {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let args: CopyArgs = params(&input)?;
        Ok(match input.get(&args.from) {
            Some(value) => StepOutput::new().set(args.to, value.clone()),
            None => StepOutput::new(),
        })
    }
}

// --- Increment ---

#[derive(Deserialize)]
struct IncrementArgs {
    field: String,
    #[serde(default = "default_step")]
    by: f64,
    until: Option<f64>,
}

fn default_step() -> f64 {
    1.0
}

/// Adds `params.by` to a numeric field, writing nothing once `params.until`
/// is reached
pub struct IncrementTask;

#[async_trait]
impl Task for IncrementTask {
    async fn run(&self, input: StepInput) -> Result<StepOutput, StepFailure> {
        let args: IncrementArgs = params(&input)?;
        let current = match input.get(&args.field) {
            None | Some(Value::Null) => 0.0,
            Some(v) => v.as_f64().ok_or_else(|| {
                StepFailure::fatal(format!("field '{}' is not numeric", args.field))
            })?,
        };
        if args.until.is_some_and(|limit| current >= limit) {
            return Ok(StepOutput::new());
        }

        let next = current + args.by;
        // Keep integers integral so integer-typed fields stay valid
        let value = if next.fract() == 0.0 && next.abs() < i64::MAX as f64 {
            json!(next as i64)
        } else {
            json!(next)
        };
        Ok(StepOutput::new().set(args.field, value))
    }
}
