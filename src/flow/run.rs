// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::error::{FlowError, TaskError};
use super::task_fn::{CanceledError, TaskContext, TaskResult};
use super::{Flow, FlowPhase, TaskState};
use crate::error::{extract_error_codes, ErrorCode};
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type ProgressReporter = Arc<dyn Fn(&Progress) + Send + Sync>;
pub type ErrorCodeExtractor = Arc<dyn Fn(&anyhow::Error) -> Vec<ErrorCode> + Send + Sync>;

/// Snapshot of a running flow, handed to the progress reporter on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub flow: String,
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total) as u8
    }
}

/// Options of a single flow run.
#[derive(Clone)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    /// How long running tasks may take to return after cancellation
    pub grace_period: Duration,
    pub progress: Option<ProgressReporter>,
    pub error_codes: ErrorCodeExtractor,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            grace_period: Duration::from_secs(5),
            progress: None,
            error_codes: Arc::new(extract_error_codes),
        }
    }
}

impl RunOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_progress<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(reporter));
        self
    }

    pub fn with_error_code_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&anyhow::Error) -> Vec<ErrorCode> + Send + Sync + 'static,
    {
        self.error_codes = Arc::new(extractor);
        self
    }
}

/// Final state of every task of a run, in graph order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub states: Vec<(String, TaskState)>,
    pub duration: Duration,
}

impl RunReport {
    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.states
            .iter()
            .find(|(name, _)| name == task)
            .map(|(_, state)| *state)
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.states.iter().filter(|(_, s)| *s == state).count()
    }
}

struct Execution<'a> {
    flow: &'a Flow,
    options: &'a RunOptions,
    states: Vec<TaskState>,
    remaining: Vec<usize>,
    ready: VecDeque<usize>,
    started: usize,
    errors: Vec<(usize, TaskError)>,
    start_seq: Vec<usize>,
}

impl<'a> Execution<'a> {
    fn new(flow: &'a Flow, options: &'a RunOptions) -> Self {
        let count = flow.nodes.len();
        let remaining: Vec<usize> = flow.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut states = vec![TaskState::Pending; count];
        let mut ready = VecDeque::new();
        for (idx, deps) in remaining.iter().enumerate() {
            if *deps == 0 {
                states[idx] = TaskState::Ready;
                ready.push_back(idx);
            }
        }
        Self {
            flow,
            options,
            states,
            remaining,
            ready,
            started: 0,
            errors: Vec::new(),
            start_seq: vec![usize::MAX; count],
        }
    }

    fn report_progress(&self) {
        let Some(reporter) = &self.options.progress else {
            return;
        };
        let progress = Progress {
            flow: self.flow.name.clone(),
            total: self.states.len(),
            completed: self.states.iter().filter(|s| s.is_final()).count(),
            running: self
                .states
                .iter()
                .filter(|s| **s == TaskState::Running)
                .count(),
            failed: self
                .states
                .iter()
                .filter(|s| matches!(s, TaskState::Failed | TaskState::UpstreamFailed))
                .count(),
        };
        reporter(&progress);
    }

    fn launch(&mut self, idx: usize, join_set: &mut JoinSet<(usize, TaskResult)>, token: &CancellationToken) {
        let flow = self.flow;
        let node = &flow.nodes[idx];
        let skip = match std::panic::catch_unwind(AssertUnwindSafe(|| node.should_skip())) {
            Ok(skip) => skip,
            Err(payload) => {
                self.start_seq[idx] = self.started;
                self.started += 1;
                self.finish(idx, Err(panic_error(payload)), false);
                return;
            }
        };
        if skip {
            debug!(flow = %self.flow.name, task = %node.name, "Skipping task");
            self.complete(idx, TaskState::Skipped);
            return;
        }
        let Some(func) = node.func.clone() else {
            self.complete(idx, TaskState::Succeeded);
            return;
        };

        debug!(flow = %self.flow.name, task = %node.name, "Starting task");
        self.states[idx] = TaskState::Running;
        self.start_seq[idx] = self.started;
        self.started += 1;

        let ctx = TaskContext::new(self.flow.name.clone(), node.name.clone(), token.clone());
        join_set.spawn(async move {
            let result = AssertUnwindSafe(async move { func.call(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(payload)));
            (idx, result)
        });
        self.report_progress();
    }

    fn finish(&mut self, idx: usize, result: TaskResult, canceled: bool) {
        let flow = self.flow;
        let name = &flow.nodes[idx].name;
        match result {
            Ok(()) => {
                debug!(flow = %self.flow.name, task = %name, "Task succeeded");
                self.complete(idx, TaskState::Succeeded);
            }
            Err(e) if canceled && e.downcast_ref::<CanceledError>().is_some() => {
                debug!(flow = %self.flow.name, task = %name, "Task returned after cancellation");
                self.complete(idx, TaskState::Canceled);
            }
            Err(e) => {
                let codes = (self.options.error_codes)(&e);
                error!(flow = %self.flow.name, task = %name, error = %format!("{:#}", e), "Task failed");
                self.errors.push((
                    self.start_seq[idx],
                    TaskError {
                        task: name.clone(),
                        error: e,
                        codes,
                    },
                ));
                self.complete(idx, TaskState::Failed);
            }
        }
    }

    fn complete(&mut self, idx: usize, state: TaskState) {
        let flow = self.flow;
        self.states[idx] = state;
        match state {
            TaskState::Succeeded | TaskState::Skipped => {
                for dependent in &flow.nodes[idx].dependents {
                    self.remaining[*dependent] -= 1;
                    if self.remaining[*dependent] == 0 && self.states[*dependent] == TaskState::Pending {
                        self.states[*dependent] = TaskState::Ready;
                        self.ready.push_back(*dependent);
                    }
                }
            }
            TaskState::Failed | TaskState::Canceled => {
                let mut queue: VecDeque<usize> = flow.nodes[idx].dependents.iter().copied().collect();
                while let Some(dependent) = queue.pop_front() {
                    if self.states[dependent] == TaskState::Pending {
                        self.states[dependent] = if state == TaskState::Failed {
                            TaskState::UpstreamFailed
                        } else {
                            TaskState::Canceled
                        };
                        queue.extend(flow.nodes[dependent].dependents.iter().copied());
                    }
                }
            }
            _ => {}
        }
        self.report_progress();
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    anyhow::anyhow!("task panicked: {}\n{}", message, Backtrace::force_capture())
}

impl Flow {
    /// Run all tasks respecting their dependencies.
    ///
    /// Tasks whose dependencies are complete are started right away. A failing task
    /// marks its dependents as upstream-failed, independent tasks keep running. The
    /// call returns once every started task finished.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport, FlowError> {
        *self.phase.lock() = FlowPhase::Running;
        let start = Instant::now();
        info!(flow = %self.name, tasks = self.nodes.len(), "Starting flow");

        let token = options.cancel.child_token();
        let mut exec = Execution::new(self, &options);
        let mut join_set = JoinSet::new();
        let mut canceled = false;
        let mut deadline: Option<Instant> = None;

        loop {
            if !canceled && token.is_cancelled() {
                canceled = true;
                deadline = Some(Instant::now() + options.grace_period);
            }
            if !canceled {
                while let Some(idx) = exec.ready.pop_front() {
                    exec.launch(idx, &mut join_set, &token);
                }
            }
            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                joined = join_set.join_next() => {
                    // Errors are aborted tasks; those stay Running and become Canceled below
                    if let Some(Ok((idx, result))) = joined {
                        exec.finish(idx, result, canceled || token.is_cancelled());
                    }
                }
                _ = token.cancelled(), if !canceled => {
                    info!(flow = %self.name, "Flow canceled, waiting for running tasks");
                    canceled = true;
                    deadline = Some(Instant::now() + options.grace_period);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(flow = %self.name, grace_period = ?options.grace_period, "Aborting tasks that ignored cancellation");
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok((idx, result)) = joined {
                            exec.finish(idx, result, canceled);
                        }
                    }
                    break;
                }
            }
        }

        for idx in 0..exec.states.len() {
            if !exec.states[idx].is_final() {
                exec.states[idx] = TaskState::Canceled;
            }
        }
        exec.report_progress();

        let report = RunReport {
            states: self
                .nodes
                .iter()
                .zip(&exec.states)
                .map(|(node, state)| (node.name.clone(), *state))
                .collect(),
            duration: start.elapsed(),
        };

        let mut errors = std::mem::take(&mut exec.errors);
        errors.sort_by_key(|(seq, _)| *seq);

        if errors.is_empty() && !canceled {
            *self.phase.lock() = FlowPhase::Succeeded;
            info!(flow = %self.name, duration = ?report.duration, "Flow succeeded");
            return Ok(report);
        }

        *self.phase.lock() = FlowPhase::Failed;
        let err = FlowError {
            flow: self.name.clone(),
            errors: errors.into_iter().map(|(_, e)| e).collect(),
            canceled,
            report,
        };
        warn!(flow = %self.name, error = %err, "Flow failed");
        Err(err)
    }
}
