// SPDX-License-Identifier: MIT

//! State management for workflow runs
//!
//! This module provides:
//! - `RecordSchema` - defines the shape and types of state and config records
//! - `StateStore` - per-run state storage with reducer support and a change log
//! - `ReducerType` - strategies for merging values into state

mod schema;
mod store;

pub use schema::{ConfigSchema, FieldDef, FieldType, RecordSchema, ReducerType, StateSchema};
pub use store::{StateChange, StateDiff, StateStore};
