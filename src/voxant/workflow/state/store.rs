// SPDX-License-Identifier: MIT

//! Runtime state storage for one run

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::schema::{ReducerType, StateSchema};
use crate::sdk::task::Record;

/// Changed fields of one round mapped to their new values (keys sorted)
pub type StateDiff = Record;

/// One committed entry of the change log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub round: u64,
    pub diff: StateDiff,
}

/// The shared state document of one run, with reducer support.
///
/// Readers get immutable snapshots; `merge` builds the next document off to
/// the side and swaps it in whole, so no snapshot ever shows a partially
/// merged round.
#[derive(Debug, Clone)]
pub struct StateStore {
    schema: Arc<StateSchema>,
    current: Arc<Record>,
    log: Vec<StateChange>,
}

impl StateStore {
    /// Create a store holding the schema's defaults
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let current = Arc::new(schema.defaults());
        Self {
            schema,
            current,
            log: Vec::new(),
        }
    }

    /// Immutable view of the last fully merged state
    pub fn snapshot(&self) -> Arc<Record> {
        self.current.clone()
    }

    /// Fold `updates` (in order) into the state using each field's reducer.
    ///
    /// Returns the fields whose value changed. Callers validate updates
    /// against the schema beforehand.
    pub fn merge(&mut self, round: u64, updates: &[Record]) -> StateDiff {
        let before = self.current.clone();
        let mut next: Record = (*before).clone();

        for update in updates {
            for (key, value) in update {
                let reducer = self.schema.reducer(key);
                match reduce(reducer, next.get(key), value.clone()) {
                    Some(reduced) => {
                        next.insert(key.clone(), reduced);
                    }
                    None => {
                        log::debug!(
                            "Reducer {:?} ignored value for field '{}'",
                            reducer,
                            key
                        );
                    }
                }
            }
        }

        let diff: StateDiff = next
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if !diff.is_empty() {
            self.log.push(StateChange {
                round,
                diff: diff.clone(),
            });
        }
        self.current = Arc::new(next);
        diff
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current.get(key)
    }

    /// Committed changes, oldest first
    pub fn changes(&self) -> &[StateChange] {
        &self.log
    }
}

/// Combine `value` into `current`; `None` means the reducer rejected it
fn reduce(reducer: ReducerType, current: Option<&Value>, value: Value) -> Option<Value> {
    match reducer {
        ReducerType::Overwrite => Some(value),
        ReducerType::Append => {
            let mut items = match current {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            match value {
                Value::Array(new_items) => items.extend(new_items),
                other => items.push(other),
            }
            Some(Value::Array(items))
        }
        ReducerType::Max | ReducerType::Min => {
            let new = value.as_f64()?;
            let keep_new = match current.and_then(|v| v.as_f64()) {
                None => true,
                Some(cur) if reducer == ReducerType::Max => new > cur,
                Some(cur) => new < cur,
            };
            Some(if keep_new {
                value
            } else {
                current.cloned().unwrap_or(value)
            })
        }
        ReducerType::Merge => {
            let Value::Object(new_obj) = value else {
                return None;
            };
            let mut merged = match current {
                Some(Value::Object(obj)) => obj.clone(),
                _ => Record::new(),
            };
            merged.extend(new_obj);
            Some(Value::Object(merged))
        }
    }
}
