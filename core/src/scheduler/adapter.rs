//! Scheduler adapter - bridges the waker protocol into a scheduling context
//!
//! Futures signal "ready to continue" by waking their `Waker`. Every waker
//! handed to a task polled under a context is produced here, and waking it
//! posts the task back onto that context's queue. Nothing is ever polled
//! from inside `wake`: a continuation only runs when the host drains.

use std::sync::Arc;
use std::task::{Wake, Waker};

use tracing::{trace, warn};

use super::ambient;
use super::bridge::EngineDefect;
use super::context::{SchedulingContext, WeakContext, WorkState};
use super::operation::OperationHandle;
use super::task::Task;
use crate::error::EngineError;

/// Protocol bridge between wakers and a `SchedulingContext`
///
/// Holds no per-routine state beyond its inline-execution policy.
#[derive(Debug, Clone)]
pub struct SchedulerAdapter {
    permit_inline_execution: bool,
}

impl SchedulerAdapter {
    /// Items of one context never run in parallel
    pub const MAX_CONCURRENCY: usize = 1;

    pub(crate) fn new(permit_inline_execution: bool) -> Self {
        Self {
            permit_inline_execution,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        Self::MAX_CONCURRENCY
    }

    pub fn permits_inline_execution(&self) -> bool {
        self.permit_inline_execution
    }

    /// Operations currently queued on `ctx`, for debuggers and inspectors
    pub fn scheduled_operations(&self, ctx: &SchedulingContext) -> Vec<OperationHandle> {
        ctx.list_pending_operations()
    }

    /* ===================== Scheduling ===================== */

    /// Schedule a newly created task: run it inline if policy allows, else post it
    pub(crate) fn schedule(&self, ctx: &SchedulingContext, task: Arc<Task>) {
        match self.try_execute_inline(ctx, &task, false) {
            Ok(true) => {}
            Ok(false) => self.queue_task(ctx, task),
            Err(err) => {
                // Surface the failure through the drain that is running the parent
                let operation = task.operation().clone();
                warn!(context = %ctx, operation = %operation, error = %err, "inline task failed");
                ctx.post_fn(move |_| Err(err), Some(operation));
            }
        }
    }

    /// Post a task's continuation onto `ctx`, unconditionally
    pub(crate) fn queue_task(&self, ctx: &SchedulingContext, task: Arc<Task>) {
        let operation = task.operation().clone();
        trace!(context = %ctx, operation = %operation, "continuation ready");
        ctx.post(run_queued_task, Box::new(task), Some(operation));
    }

    /// Run `task` right now instead of queueing it
    ///
    /// Only allowed when the policy permits inline execution, the calling
    /// thread is currently executing under `ctx`, and the task has not
    /// already been queued. Returns whether the task ran.
    pub(crate) fn try_execute_inline(
        &self,
        ctx: &SchedulingContext,
        task: &Arc<Task>,
        previously_queued: bool,
    ) -> anyhow::Result<bool> {
        if !self.permit_inline_execution || previously_queued || !ambient::is_current(ctx) {
            return Ok(false);
        }

        trace!(context = %ctx, operation = %task.operation(), "executing task inline");
        task.run(ctx)?;
        Ok(true)
    }

    /// Waker that re-posts `task` onto `ctx` when woken
    pub(crate) fn waker_for(&self, ctx: &SchedulingContext, task: &Arc<Task>) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            task: Arc::clone(task),
            context: ctx.downgrade(),
        }))
    }
}

/// Continuation posted for a ready task
pub(crate) fn run_queued_task(ctx: &SchedulingContext, state: WorkState) -> anyhow::Result<()> {
    let task = state.downcast::<Arc<Task>>().map_err(|_| {
        EngineDefect(EngineError::InvariantViolation(
            "task continuation received a work state that is not a task".to_string(),
        ))
    })?;
    task.run(ctx)
}

/* ===================== Waker ===================== */

struct TaskWaker {
    task: Arc<Task>,
    context: WeakContext,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match self.context.upgrade() {
            Some(ctx) => ctx.adapter().queue_task(&ctx, Arc::clone(&self.task)),
            None => trace!(operation = %self.task.operation(), "wake after context was dropped"),
        }
    }
}

#[cfg(test)]
#[path = "tests/adapter_tests.rs"]
mod tests;
