//! Blocking dispatch bridge
//!
//! Runs exactly one work item on a thread borrowed from the shared worker
//! pool while the draining thread waits for it. The hand-off keeps the
//! one-at-a-time guarantee and keeps the depth of a routine's resume chain
//! off the host's own stack.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;
use tracing::trace;

use super::ambient;
use super::context::{SchedulingContext, WorkItem};
use super::{lock, panic_message};
use crate::config::EngineConfig;
use crate::error::{ContinuationError, EngineError};

/* ===================== Worker Pool ===================== */

/// Shared pool of threads that dispatched items run on
///
/// Cloning shares the pool. The pool shuts down without blocking once the
/// last clone is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    runtime: Option<tokio::runtime::Runtime>,
    handle: tokio::runtime::Handle,
}

impl WorkerPool {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime: Some(runtime),
                handle,
            }),
        })
    }

    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Completion is reported through the invocation state, not the join handle
        drop(self.inner.handle.spawn_blocking(job));
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/* ===================== Invocation State ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionStatus {
    Idle,
    NotStarted,
    Succeeded,
    Failed,
}

/// Why a dispatched item did not succeed
#[derive(Debug)]
pub(crate) enum DispatchError {
    /// User code failed; recorded and the drain goes on
    Continuation(ContinuationError),
    /// The engine is in a broken state; the drain stops
    Engine(EngineError),
}

/// Defect raised by a continuation the engine itself posted
///
/// Only engine code can build one. An `EngineError` returned by user code is
/// an ordinary failure and does not stop the drain.
#[derive(Debug, Error)]
#[error(transparent)]
pub(crate) struct EngineDefect(pub(crate) EngineError);

/// One-shot hand-off slot between the draining thread and a worker
///
/// Reused for every item of a drain. Each `reset` starts a new generation so
/// that a late signal from an earlier item can never complete a later one.
pub(crate) struct InvocationState {
    slot: Mutex<InvocationSlot>,
    completed: Condvar,
}

struct InvocationSlot {
    generation: u64,
    item: Option<WorkItem>,
    status: ExecutionStatus,
    failure: Option<DispatchError>,
}

impl InvocationState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(InvocationSlot {
                generation: 0,
                item: None,
                status: ExecutionStatus::Idle,
                failure: None,
            }),
            completed: Condvar::new(),
        })
    }

    fn reset(&self, item: WorkItem) -> Result<u64, EngineError> {
        let mut slot = lock(&self.slot);
        if slot.status == ExecutionStatus::NotStarted {
            return Err(EngineError::InvariantViolation(
                "invocation state reset while an item was still in flight".to_string(),
            ));
        }

        slot.generation += 1;
        slot.item = Some(item);
        slot.status = ExecutionStatus::NotStarted;
        slot.failure = None;
        Ok(slot.generation)
    }

    fn take_item(&self, generation: u64) -> Option<WorkItem> {
        let mut slot = lock(&self.slot);
        if slot.generation != generation {
            return None;
        }
        slot.item.take()
    }

    fn try_set_succeeded(&self, generation: u64) -> bool {
        self.try_complete(generation, ExecutionStatus::Succeeded, None)
    }

    fn try_set_failed(&self, generation: u64, failure: DispatchError) -> bool {
        self.try_complete(generation, ExecutionStatus::Failed, Some(failure))
    }

    fn try_complete(
        &self,
        generation: u64,
        status: ExecutionStatus,
        failure: Option<DispatchError>,
    ) -> bool {
        let mut slot = lock(&self.slot);
        if slot.generation != generation || slot.status != ExecutionStatus::NotStarted {
            return false;
        }

        slot.status = status;
        slot.failure = failure;
        self.completed.notify_all();
        true
    }

    /// Block until the in-flight item finishes, then hand back its outcome
    fn wait_for_completion(&self) -> Result<(), DispatchError> {
        let mut slot = lock(&self.slot);
        while slot.status == ExecutionStatus::NotStarted {
            slot = self
                .completed
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }

        let status = slot.status;
        let failure = slot.failure.take();
        slot.status = ExecutionStatus::Idle;

        match (status, failure) {
            (ExecutionStatus::Succeeded, None) => Ok(()),
            (ExecutionStatus::Failed, Some(failure)) => Err(failure),
            (status, _) => Err(DispatchError::Engine(EngineError::InvariantViolation(
                format!("invocation finished in inconsistent state {:?}", status),
            ))),
        }
    }
}

/// Completes the invocation as a defect if the job is dropped without reporting
struct CompletionGuard {
    state: Arc<InvocationState>,
    generation: u64,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.state.try_set_failed(
            self.generation,
            DispatchError::Engine(EngineError::InvariantViolation(
                "worker pool dropped a work item without running it".to_string(),
            )),
        );
    }
}

/* ===================== Bridge ===================== */

#[derive(Clone)]
pub(crate) struct DispatchBridge {
    pool: WorkerPool,
}

impl DispatchBridge {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Run `item` on a pool thread and block until it has finished
    pub(crate) fn dispatch(
        &self,
        ctx: &SchedulingContext,
        item: WorkItem,
        invocation: &Arc<InvocationState>,
    ) -> Result<(), DispatchError> {
        let generation = invocation.reset(item).map_err(DispatchError::Engine)?;

        let guard = CompletionGuard {
            state: Arc::clone(invocation),
            generation,
        };
        let ctx = ctx.clone();

        self.pool.execute(move || {
            let guard = guard;
            execute_work_item(&ctx, &guard.state, guard.generation);
        });

        invocation.wait_for_completion()
    }
}

fn execute_work_item(ctx: &SchedulingContext, state: &InvocationState, generation: u64) {
    let Some(item) = state.take_item(generation) else {
        state.try_set_failed(
            generation,
            DispatchError::Engine(EngineError::InvariantViolation(
                "dispatched invocation carried no work item".to_string(),
            )),
        );
        return;
    };

    let operation = item.operation().cloned();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_in_context(ctx, item)));

    match outcome {
        Ok(Ok(())) => {
            state.try_set_succeeded(generation);
        }
        Ok(Err(failure)) => {
            state.try_set_failed(generation, failure);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            state.try_set_failed(
                generation,
                DispatchError::Continuation(ContinuationError::Panicked { message, operation }),
            );
        }
    }
}

/// Execute one item with `ctx` installed as the ambient context
pub(crate) fn run_in_context(ctx: &SchedulingContext, item: WorkItem) -> Result<(), DispatchError> {
    let _ambient = ambient::enter(ctx);
    let _execution = ctx.begin_execution().map_err(DispatchError::Engine)?;

    trace!(context = %ctx, operation = ?item.operation(), "executing work item");
    item.invoke(ctx).map_err(classify_failure)
}

/// Separate engine defects from user-code failures by where they came from
fn classify_failure(err: anyhow::Error) -> DispatchError {
    match err.downcast::<EngineDefect>() {
        Ok(EngineDefect(defect)) => DispatchError::Engine(defect),
        Err(err) => match err.downcast::<ContinuationError>() {
            Ok(failure) => DispatchError::Continuation(failure),
            Err(err) => DispatchError::Continuation(ContinuationError::Failed(err)),
        },
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
