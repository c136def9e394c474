// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline descriptors handed to the bridge by the pipeline runtime.

use std::collections::HashSet;

use crate::error::ExecutionError;
use crate::types::RemoteSource;

/// One step of a pipeline and the remote operation executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub name: String,
    pub operation_id: String,
    /// Number of parallel copies the step runs with
    pub copies: u32,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation_id: operation_id.into(),
            copies: 1,
        }
    }

    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    /// Remote identity of copy `copy` of this step.
    ///
    /// Copy 0 uses the bare operation id, further copies append `.<copy>`.
    pub fn source_for_copy(&self, copy: u32) -> RemoteSource {
        if copy == 0 {
            RemoteSource::operation(self.operation_id.clone())
        } else {
            RemoteSource::operation(format!("{}.{}", self.operation_id, copy))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub id: String,
    pub name: String,
    pub steps: Vec<StepDescriptor>,
}

impl PipelineDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    /// Remote identity of the whole pipeline.
    pub fn source(&self) -> RemoteSource {
        RemoteSource::transformation(self.id.clone())
    }

    pub fn step(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Total number of step copies.
    pub fn copy_count(&self) -> usize {
        self.steps.iter().map(|step| step.copies as usize).sum()
    }

    pub fn validate(&self) -> Result<(), ExecutionError> {
        let invalid = |reason: String| Err(ExecutionError::InvalidDescriptor(reason));

        if self.id.is_empty() {
            return invalid("pipeline id is empty".to_string());
        }
        if self.steps.is_empty() {
            return invalid(format!("pipeline {} has no steps", self.id));
        }

        let mut names = HashSet::new();
        let mut operations = HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return invalid(format!("pipeline {} has a step without a name", self.id));
            }
            if !names.insert(step.name.as_str()) {
                return invalid(format!("duplicate step name {}", step.name));
            }
            if step.operation_id.is_empty() {
                return invalid(format!("step {} has no operation id", step.name));
            }
            if !operations.insert(step.operation_id.as_str()) {
                return invalid(format!(
                    "operation {} is used by more than one step",
                    step.operation_id
                ));
            }
            if step.copies == 0 {
                return invalid(format!("step {} has zero copies", step.name));
            }
        }
        Ok(())
    }
}
