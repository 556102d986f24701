// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Task functions and their decorators.

use crate::error::{extract_error_codes, has_non_retryable_code};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type TaskResult = anyhow::Result<()>;

/// Returned by a task wrapped with [`TaskFn::timeout`] when the deadline passes.
#[derive(Debug, Error)]
#[error("task did not finish within {0:?}")]
pub struct TimeoutError(pub Duration);

/// Returned by decorators that gave up because the flow was canceled.
#[derive(Debug, Error)]
#[error("task was canceled")]
pub struct CanceledError;

/// Runtime information handed to every task invocation.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub flow: String,
    pub task: String,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(flow: impl Into<String>, task: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            flow: flow.into(),
            task: task.into(),
            cancel,
        }
    }

    /// A context that is never canceled, for calling task functions outside a flow.
    pub fn detached(task: impl Into<String>) -> Self {
        Self::new("", task, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the surrounding flow run is canceled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

type TaskFnInner = dyn Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync;

/// A unit of work executed by the flow engine.
#[derive(Clone)]
pub struct TaskFn(Arc<TaskFnInner>);

impl std::fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskFn")
    }
}

impl TaskFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        TaskFn(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn noop() -> Self {
        TaskFn::new(|_| async { Ok(()) })
    }

    /// A task operating on shared `state`, which is cloned into every invocation.
    pub fn bound<S, F, Fut, E>(state: &Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let state = state.clone();
        TaskFn::new(move |_| {
            let fut = f(state.clone());
            async move { fut.await.map_err(Into::into) }
        })
    }

    pub fn call(&self, ctx: TaskContext) -> BoxFuture<'static, TaskResult> {
        (self.0)(ctx)
    }

    /// Fail the task with [`TimeoutError`] if it runs longer than `timeout`.
    pub fn timeout(self, timeout: Duration) -> Self {
        TaskFn::new(move |ctx| {
            let inner = self.clone();
            async move {
                match tokio::time::timeout(timeout, inner.call(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(TimeoutError(timeout).into()),
                }
            }
        })
    }

    /// Rerun the task on transient errors.
    ///
    /// Backoff starts at one second (or `max_interval` if smaller) and doubles up to
    /// `max_interval`; at most `tries` attempts are made. Errors carrying a
    /// non-retryable error code stop the retries right away.
    pub fn retry(self, max_interval: Duration, tries: u32) -> Self {
        self.retry_if(max_interval, tries, is_transient)
    }

    pub fn retry_if<P>(self, max_interval: Duration, tries: u32, retryable: P) -> Self
    where
        P: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        let retryable = Arc::new(retryable);
        TaskFn::new(move |ctx| {
            let inner = self.clone();
            let retryable = retryable.clone();
            let config = RetryConfig {
                max_attempts: tries.max(1),
                initial_delay: max_interval.min(Duration::from_secs(1)),
                max_delay: max_interval,
                backoff_multiplier: 2.0,
            };
            async move {
                let name = ctx.task.clone();
                let attempt_ctx = ctx.clone();
                tokio::select! {
                    result = retry_with_backoff_if(
                        &config,
                        &name,
                        |e| (*retryable)(e),
                        || inner.call(attempt_ctx.clone()),
                    ) => result,
                    _ = ctx.cancelled() => Err(CanceledError.into()),
                }
            }
        })
    }

    /// Replace the task by a no-op if `condition` holds.
    pub fn skip_if(self, condition: bool) -> Self {
        if condition {
            TaskFn::noop()
        } else {
            self
        }
    }

    /// Keep the task only if `condition` holds.
    pub fn do_if(self, condition: bool) -> Self {
        self.skip_if(!condition)
    }

    /// Run all functions concurrently and aggregate their errors.
    pub fn parallel(fns: Vec<TaskFn>) -> Self {
        TaskFn::new(move |ctx| {
            let futures: Vec<_> = fns.iter().map(|f| f.call(ctx.clone())).collect();
            async move {
                let errors: Vec<String> = join_all(futures)
                    .await
                    .into_iter()
                    .filter_map(|r| r.err().map(|e| format!("{:#}", e)))
                    .collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("{}", errors.join("; ")))
                }
            }
        })
    }

    /// Run the functions one after another, stopping at the first error.
    pub fn sequential(fns: Vec<TaskFn>) -> Self {
        let fns = Arc::new(fns);
        TaskFn::new(move |ctx| {
            let fns = fns.clone();
            async move {
                for f in fns.iter() {
                    f.call(ctx.clone()).await?;
                }
                Ok(())
            }
        })
    }
}

/// Default retry predicate: everything except cancellation and non-retryable codes.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<CanceledError>().is_some() {
        return false;
    }
    !has_non_retryable_code(&extract_error_codes(err))
}
