// SPDX-License-Identifier: MIT

//! Workflow loader - YAML file loading and parsing

use std::fs;
use std::path::{Path, PathBuf};

use super::types::WorkflowDefinition;
use crate::sdk::error::{VoxantError, WorkflowError};

/// Loads workflow definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a workflow definition from a YAML file
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition, VoxantError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WorkflowError::FileNotFound(path.display().to_string()).into());
        }
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a workflow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition, VoxantError> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }

    /// Workflow files in `dir` as `(id, path)`, sorted by id.
    ///
    /// The id is the file stem. A missing directory yields nothing.
    pub fn discover<P: AsRef<Path>>(dir: P) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(dir.as_ref()) else {
            log::warn!("Workflow directory {:?} not readable", dir.as_ref());
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push((stem.to_string(), path.clone()));
                }
            }
        }
        found.sort();
        found
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
