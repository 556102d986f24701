// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::run::RunReport;
use super::TaskId;
use crate::error::ErrorCode;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("flow {flow:?} contains task {task:?} more than once")]
    DuplicateTask { flow: String, task: String },

    #[error("task {task:?} of flow {flow:?} depends on unknown task {dependency}")]
    UnknownDependency {
        flow: String,
        task: String,
        dependency: TaskId,
    },

    #[error("flow {flow:?} contains a cycle between tasks {tasks:?}")]
    Cycle { flow: String, tasks: Vec<String> },
}

/// The failure of a single task.
#[derive(Debug)]
pub struct TaskError {
    pub task: String,
    pub error: anyhow::Error,
    pub codes: Vec<ErrorCode>,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:?} failed: {:#}", self.task, self.error)
    }
}

/// Aggregated failure of a flow run.
#[derive(Debug)]
pub struct FlowError {
    pub flow: String,
    /// Failed tasks in the order they were started
    pub errors: Vec<TaskError>,
    pub canceled: bool,
    pub report: RunReport,
}

impl FlowError {
    /// Union of the error codes of all failed tasks.
    pub fn codes(&self) -> Vec<ErrorCode> {
        let mut codes: Vec<ErrorCode> = self
            .errors
            .iter()
            .flat_map(|e| e.codes.iter().copied())
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.task.as_str())
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "flow {:?} was canceled", self.flow);
        }
        write!(f, "flow {:?} encountered task errors: [", self.flow)?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        f.write_str("]")?;
        if self.canceled {
            f.write_str(" (canceled)")?;
        }
        Ok(())
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.first().map(|e| {
            let err: &(dyn std::error::Error + 'static) = e.error.as_ref();
            err
        })
    }
}
