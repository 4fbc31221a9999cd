// SPDX-License-Identifier: MIT

//! Step graph definition
//!
//! A `Workflow` is an ordered list of step descriptors. Declaration order is
//! significant: it is the deterministic tie-break when several steps write
//! the same field in one round. Edges are implicit: step S feeds step T when
//! S writes a field T reads.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::sdk::error::WorkflowError;
use crate::sdk::step::Step;
use crate::voxant::workflow::state::StateSchema;

#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
    allow_cycles: bool,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            allow_cycles: false,
        }
    }

    /// Append a step (declaration order = merge order)
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Permit write -> read cycles; such graphs are bounded by the round limit
    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.allow_cycles = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Names of the steps that run in round 0
    pub fn entry_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.entry)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Check the graph against the state schema
    pub fn validate(&self, schema: &StateSchema) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.name.clone()));
            }
            if let Some(field) = step
                .reads
                .iter()
                .chain(step.writes.iter())
                .find(|f| !schema.contains(f))
            {
                return Err(WorkflowError::UnknownField {
                    step: step.name.clone(),
                    field: field.clone(),
                });
            }
        }

        if !self.steps.iter().any(|s| s.entry) {
            return Err(WorkflowError::NoEntryStep(self.name.clone()));
        }

        if !self.allow_cycles {
            if let Some(cycle) = self.find_cycle() {
                return Err(WorkflowError::CircularDependency(cycle));
            }
        }
        Ok(())
    }

    /// Indices of the steps fed by step `idx`
    fn successors(&self, idx: usize) -> Vec<usize> {
        let writes: BTreeSet<String> = self.steps[idx].writes.iter().cloned().collect();
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_triggered_by(&writes))
            .map(|(i, _)| i)
            .collect()
    }

    /// Find one write -> read cycle, returned as the step names along it
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let edges: HashMap<usize, Vec<usize>> = (0..self.steps.len())
            .map(|i| (i, self.successors(i)))
            .collect();
        let mut marks = vec![Mark::Unvisited; self.steps.len()];

        for root in 0..self.steps.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS: (node, next edge index)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let succ = &edges[&node];
                if top.1 < succ.len() {
                    let child = succ[top.1];
                    top.1 += 1;
                    match marks[child] {
                        Mark::InProgress => {
                            let start = stack.iter().position(|(n, _)| *n == child)?;
                            let mut cycle: Vec<String> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.steps[*n].name.clone())
                                .collect();
                            cycle.push(self.steps[child].name.clone());
                            return Some(cycle);
                        }
                        Mark::Unvisited => {
                            marks[child] = Mark::InProgress;
                            stack.push((child, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        None
    }
}
