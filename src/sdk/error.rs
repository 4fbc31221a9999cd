// SPDX-License-Identifier: MIT

//! Typed error handling for voxant-rs
//!
//! Step-level failures are values (`StepFailure`, `RunFailure`) that end up in
//! a run's terminal status; they never propagate out of the engine as `Err`.
//! `VoxantError` is the top-level error for everything that is surfaced
//! synchronously to a caller.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for voxant-rs
#[derive(Debug, Error)]
pub enum VoxantError {
    /// Step graph definition errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Config rejected before a run was created
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    /// State or config record failed schema validation
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    /// `start()` called on an executor whose background tasks are running
    #[error("Executor already started")]
    AlreadyStarted,

    /// Two background tasks registered under the same name
    #[error("Duplicate background task: {0}")]
    DuplicateTask(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

impl VoxantError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for VoxantError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for VoxantError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

/// Step graph definition errors, raised before any run starts
#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    /// Two steps share a name
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// A step reads or writes a field the state schema does not declare
    #[error("Step '{step}' references unknown state field '{field}'")]
    UnknownField { step: String, field: String },

    /// Circular write -> read dependency between steps
    #[error("Circular dependency detected: {0:?}")]
    CircularDependency(Vec<String>),

    /// Nothing would run in round 0
    #[error("Workflow '{0}' has no entry step")]
    NoEntryStep(String),

    /// A definition references a task the registry does not know
    #[error("Step '{step}' references unknown task '{task}'")]
    UnknownTask { step: String, task: String },

    /// A definition file could not be found
    #[error("Workflow file not found: {0}")]
    FileNotFound(String),

    /// Malformed definition (bad field type name, bad reducer, ...)
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

/// A typed record did not match its schema
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum SchemaValidationError {
    #[error("expected an object, got {found}")]
    NotAnObject { found: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
}

/// Config supplied to `execute` was rejected; no run was created
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Config validation failed: {0}")]
pub struct ConfigValidationError(#[from] pub SchemaValidationError);

/// Classification of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task returned an error
    Error,
    /// The attempt exceeded the step's timeout
    Timeout,
    /// The task produced an update the step may not write
    InvalidOutput,
    /// The invocation panicked
    Panicked,
}

/// Failure of a single step attempt
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Whether a retry policy may re-attempt after this failure
    pub retryable: bool,
}

impl StepFailure {
    /// A retryable task error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
            retryable: true,
        }
    }

    /// A task error that no retry policy will re-attempt
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(message)
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("attempt timed out after {:?}", after),
            retryable: true,
        }
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidOutput,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panicked,
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<&str> for StepFailure {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepFailure {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<serde_json::Error> for StepFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A step exhausted its retry policy; terminal for the owning run
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("step '{step}' gave up after {attempts} attempt(s): {error}")]
pub struct RunFailure {
    pub step: String,
    pub attempts: u32,
    pub error: StepFailure,
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    #[error(transparent)]
    StepFailed(RunFailure),

    #[error("round-limit-exceeded: no fixpoint after {limit} rounds")]
    RoundLimitExceeded { limit: u64 },
}

/// A background task did not acknowledge cancellation in time
#[derive(Debug, Clone, Error, PartialEq)]
#[error("background task '{task}' did not stop within {waited:?}")]
pub struct ShutdownTimeout {
    pub task: String,
    pub waited: Duration,
}
