// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DAG-based task execution.
//!
//! A [`Graph`] collects named tasks and their dependencies. Compiling it checks the
//! graph for unknown dependencies, duplicate names and cycles and yields a [`Flow`],
//! which can be run any number of times. Independent tasks run concurrently.

mod error;
mod run;
mod task_fn;

pub use error::{FlowError, GraphError, TaskError};
pub use run::{ErrorCodeExtractor, Progress, ProgressReporter, RunOptions, RunReport};
pub use task_fn::{is_transient, CanceledError, TaskContext, TaskFn, TaskResult, TimeoutError};

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Identifier of a task inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-task lifecycle within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    /// Not run because a (transitive) dependency failed
    UpstreamFailed,
    Canceled,
}

impl TaskState {
    pub fn is_final(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Ready | TaskState::Running)
    }
}

/// Lifecycle of a compiled flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Compiled,
    Running,
    Succeeded,
    Failed,
}

type SkipPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A named node of a flow graph.
///
/// A task without a function is a sync point: it completes as soon as all of its
/// dependencies did.
pub struct Task {
    name: String,
    func: Option<TaskFn>,
    dependencies: BTreeSet<TaskId>,
    skip_if: Option<SkipPredicate>,
    do_if: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, func: TaskFn) -> Self {
        Self {
            name: name.into(),
            func: Some(func),
            dependencies: BTreeSet::new(),
            skip_if: None,
            do_if: true,
        }
    }

    pub fn sync_point(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
            dependencies: BTreeSet::new(),
            skip_if: None,
            do_if: true,
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    /// Skip the task when `predicate` returns true at the moment the task becomes ready.
    pub fn skip_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(predicate));
        self
    }

    /// Only run the task if `condition` holds.
    pub fn do_if(mut self, condition: bool) -> Self {
        self.do_if = condition;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("sync_point", &self.func.is_none())
            .field("dependencies", &self.dependencies)
            .field("do_if", &self.do_if)
            .finish()
    }
}

/// Builder of a flow.
#[derive(Debug)]
pub struct Graph {
    name: String,
    tasks: Vec<Task>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Add a task and return its id for use in later `depends_on` calls.
    pub fn add(&mut self, task: Task) -> TaskId {
        self.tasks.push(task);
        TaskId(self.tasks.len() - 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the graph and turn it into a runnable flow.
    pub fn compile(self) -> Result<Flow, GraphError> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(GraphError::DuplicateTask {
                    flow: self.name.clone(),
                    task: task.name.clone(),
                });
            }
        }

        let count = self.tasks.len();
        let mut dependents = vec![Vec::new(); count];
        for (idx, task) in self.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if dep.0 >= count {
                    return Err(GraphError::UnknownDependency {
                        flow: self.name.clone(),
                        task: task.name.clone(),
                        dependency: *dep,
                    });
                }
                if dep.0 == idx {
                    return Err(GraphError::Cycle {
                        flow: self.name.clone(),
                        tasks: vec![task.name.clone()],
                    });
                }
                dependents[dep.0].push(idx);
            }
        }

        // Kahn's algorithm; whatever cannot be ordered is part of a cycle
        let mut in_degree: Vec<usize> = self.tasks.iter().map(|t| t.dependencies.len()).collect();
        let mut queue: VecDeque<usize> = (0..count).filter(|i| in_degree[*i] == 0).collect();
        let mut ordered = 0;
        while let Some(idx) = queue.pop_front() {
            ordered += 1;
            for dependent in &dependents[idx] {
                in_degree[*dependent] -= 1;
                if in_degree[*dependent] == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
        if ordered != count {
            let tasks = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, t)| t.name.clone())
                .collect();
            return Err(GraphError::Cycle {
                flow: self.name,
                tasks,
            });
        }

        let nodes = self
            .tasks
            .into_iter()
            .zip(dependents)
            .map(|(task, dependents)| Node {
                name: task.name,
                func: task.func,
                dependencies: task.dependencies.into_iter().map(|d| d.0).collect(),
                dependents,
                skip_if: task.skip_if,
                do_if: task.do_if,
            })
            .collect();

        Ok(Flow {
            name: self.name,
            nodes,
            phase: Mutex::new(FlowPhase::Compiled),
        })
    }
}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) func: Option<TaskFn>,
    pub(crate) dependencies: Vec<usize>,
    pub(crate) dependents: Vec<usize>,
    pub(crate) skip_if: Option<SkipPredicate>,
    pub(crate) do_if: bool,
}

impl Node {
    fn should_skip(&self) -> bool {
        !self.do_if || self.skip_if.as_ref().is_some_and(|p| p())
    }
}

/// A compiled, immutable task graph.
pub struct Flow {
    name: String,
    nodes: Vec<Node>,
    phase: Mutex<FlowPhase>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("tasks", &self.nodes.len())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn phase(&self) -> FlowPhase {
        *self.phase.lock()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }
}
