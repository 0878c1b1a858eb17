//! Scheduling context - the per-routine continuation queue
//!
//! A `SchedulingContext` owns an ordered queue of posted work items for
//! exactly one routine. Posting never executes anything; items only run when
//! the host calls [`SchedulingContext::drain`], which hands them one at a
//! time to the dispatch bridge until the queue is observed empty.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

use tracing::{debug, error, trace, warn};

use super::adapter::SchedulerAdapter;
use super::ambient;
use super::bridge::{DispatchBridge, DispatchError, InvocationState, WorkerPool};
use super::lock;
use super::operation::OperationHandle;
use crate::config::EngineConfig;
use crate::error::{DrainError, EngineError};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque state handed back to a continuation when it runs
pub type WorkState = Box<dyn Any + Send>;

/// A posted continuation
///
/// Receives the context it runs under explicitly, along with the state it
/// was posted with.
pub type Continuation =
    Box<dyn FnOnce(&SchedulingContext, WorkState) -> anyhow::Result<()> + Send + 'static>;

/* ===================== Work Items ===================== */

/// One queued continuation
pub struct WorkItem {
    continuation: Continuation,
    state: WorkState,
    operation: Option<OperationHandle>,
}

impl WorkItem {
    pub(crate) fn new(
        continuation: Continuation,
        state: WorkState,
        operation: Option<OperationHandle>,
    ) -> Self {
        Self {
            continuation,
            state,
            operation,
        }
    }

    pub fn operation(&self) -> Option<&OperationHandle> {
        self.operation.as_ref()
    }

    pub(crate) fn invoke(self, ctx: &SchedulingContext) -> anyhow::Result<()> {
        (self.continuation)(ctx, self.state)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/* ===================== Scheduling Context ===================== */

/// Execution domain of one routine
///
/// Cloning is cheap and yields another handle to the same queue.
#[derive(Clone)]
pub struct SchedulingContext {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    id: u64,
    original_id: u64,
    queue: Mutex<VecDeque<WorkItem>>,
    /// Held for the whole of a drain so drains of one context never overlap
    drain_lock: Mutex<()>,
    /// Items currently executing under this context
    executing: AtomicUsize,
    peak_executing: AtomicUsize,
    adapter: SchedulerAdapter,
    bridge: DispatchBridge,
    max_drain_iterations: Option<usize>,
}

/// Non-owning handle held by wakers
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextInner>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<SchedulingContext> {
        self.0.upgrade().map(|inner| SchedulingContext { inner })
    }
}

impl SchedulingContext {
    pub(crate) fn new(pool: WorkerPool, config: &EngineConfig) -> Self {
        Self::from_parts(
            None,
            SchedulerAdapter::new(config.permit_inline_execution),
            DispatchBridge::new(pool),
            config.max_drain_iterations,
        )
    }

    fn from_parts(
        original_id: Option<u64>,
        adapter: SchedulerAdapter,
        bridge: DispatchBridge,
        max_drain_iterations: Option<usize>,
    ) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(ContextInner {
                id,
                original_id: original_id.unwrap_or(id),
                queue: Mutex::new(VecDeque::new()),
                drain_lock: Mutex::new(()),
                executing: AtomicUsize::new(0),
                peak_executing: AtomicUsize::new(0),
                adapter,
                bridge,
                max_drain_iterations,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Id of the context this one was copied from (its own id if it is an original)
    pub fn original_id(&self) -> u64 {
        self.inner.original_id
    }

    pub fn adapter(&self) -> &SchedulerAdapter {
        &self.inner.adapter
    }

    /// Returns a fresh context with an empty queue that shares this one's lineage
    ///
    /// Queues and execution are fully independent; only `original_id` is shared.
    pub fn copy(&self) -> SchedulingContext {
        Self::from_parts(
            Some(self.inner.original_id),
            self.inner.adapter.clone(),
            self.inner.bridge.clone(),
            self.inner.max_drain_iterations,
        )
    }

    pub(crate) fn same_as(&self, other: &SchedulingContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.inner))
    }

    /* ===================== Posting ===================== */

    /// Append a continuation to the tail of the queue
    ///
    /// Never runs the continuation, even when called from a thread that is
    /// currently draining this context.
    pub fn post<F>(&self, continuation: F, state: WorkState, operation: Option<OperationHandle>)
    where
        F: FnOnce(&SchedulingContext, WorkState) -> anyhow::Result<()> + Send + 'static,
    {
        let item = WorkItem::new(Box::new(continuation), state, operation);

        let queued = {
            let mut queue = lock(&self.inner.queue);
            queue.push_back(item);
            queue.len()
        };

        trace!(context = %self, queued, "posted work item");
    }

    /// Post a continuation that needs no state
    pub fn post_fn<F>(&self, continuation: F, operation: Option<OperationHandle>)
    where
        F: FnOnce(&SchedulingContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.post(move |ctx, _state| continuation(ctx), Box::new(()), operation);
    }

    fn try_dequeue(&self) -> Option<WorkItem> {
        lock(&self.inner.queue).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /* ===================== Draining ===================== */

    /// Execute queued items one at a time until the queue is empty
    ///
    /// Items posted while the drain is running are consumed by the same
    /// drain. A failing item does not stop the drain: a single failure is
    /// returned unchanged once the queue is empty, several failures are
    /// returned together as an aggregate in order of occurrence. Engine
    /// defects abort the drain immediately and carry the failures collected
    /// so far. A user continuation returning an `EngineError` of its own is
    /// an ordinary failure, not a defect.
    ///
    /// When `max_drain_iterations` is configured, at most that many items run
    /// and the rest stay queued for the next drain.
    pub fn drain(&self) -> Result<(), DrainError> {
        if ambient::is_current(self) {
            debug!(context = %self, "drain requested from inside the context; ignoring");
            return Ok(());
        }

        let _exclusive = self.lock_drain();
        let invocation = InvocationState::new();
        let mut failures = Vec::new();
        let mut executed = 0usize;

        debug!(context = %self, queued = self.len(), "drain started");

        loop {
            if let Some(limit) = self.inner.max_drain_iterations {
                if executed >= limit {
                    let remaining = self.len();
                    if remaining > 0 {
                        warn!(
                            context = %self,
                            limit,
                            remaining,
                            "drain iteration cap reached; deferring remaining items"
                        );
                    }
                    break;
                }
            }

            let Some(item) = self.try_dequeue() else {
                break;
            };
            executed += 1;

            match self.inner.bridge.dispatch(self, item, &invocation) {
                Ok(()) => {}
                Err(DispatchError::Continuation(failure)) => {
                    warn!(context = %self, error = %failure, "work item failed");
                    failures.push(failure);
                }
                Err(DispatchError::Engine(defect)) => {
                    error!(
                        context = %self,
                        error = %defect,
                        failed = failures.len(),
                        "engine defect during drain"
                    );
                    return Err(DrainError::Engine { defect, failures });
                }
            }
        }

        debug!(context = %self, executed, failed = failures.len(), "drain finished");

        match DrainError::from_failures(failures) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub(crate) fn lock_drain(&self) -> MutexGuard<'_, ()> {
        lock(&self.inner.drain_lock)
    }

    /// Mark one item as executing for the lifetime of the returned guard
    ///
    /// Exceeding the adapter's concurrency ceiling means the one-at-a-time
    /// invariant is broken, which is reported as an engine defect.
    pub(crate) fn begin_execution(&self) -> Result<ExecutionGuard<'_>, EngineError> {
        let running = self.inner.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_executing.fetch_max(running, Ordering::SeqCst);
        let guard = ExecutionGuard { ctx: self };

        let ceiling = self.inner.adapter.max_concurrency();
        if running > ceiling {
            return Err(EngineError::InvariantViolation(format!(
                "{} is executing {} items at once, ceiling is {}",
                self, running, ceiling
            )));
        }

        Ok(guard)
    }

    /// Highest number of items ever observed executing at once
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak_executing.load(Ordering::SeqCst)
    }

    /* ===================== Introspection ===================== */

    /// Best-effort snapshot of the operations attached to queued items
    ///
    /// Never blocks: if the queue is locked by another thread at this moment,
    /// an empty snapshot is returned instead. An empty result therefore means
    /// either that nothing is queued or that the queue was busy; callers that
    /// need to tell the two apart should check `len()` or retry.
    pub fn list_pending_operations(&self) -> Vec<OperationHandle> {
        let collect = |queue: &VecDeque<WorkItem>| {
            queue
                .iter()
                .filter_map(|item| item.operation.clone())
                .collect::<Vec<_>>()
        };

        match self.inner.queue.try_lock() {
            Ok(queue) => collect(&queue),
            Err(TryLockError::Poisoned(poisoned)) => collect(&poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Vec::new(),
        }
    }
}

impl fmt::Display for SchedulingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SchedulingContext(id={}, original_id={})",
            self.inner.id, self.inner.original_id
        )
    }
}

impl fmt::Debug for SchedulingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulingContext")
            .field("id", &self.inner.id)
            .field("original_id", &self.inner.original_id)
            .field("adapter", &self.inner.adapter)
            .finish_non_exhaustive()
    }
}

/// Decrements the executing count on drop
pub(crate) struct ExecutionGuard<'a> {
    ctx: &'a SchedulingContext,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.ctx.inner.executing.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl SchedulingContext {
    /// Hold the queue lock, as a concurrent poster would
    pub(crate) fn hold_queue_lock(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        lock(&self.inner.queue)
    }
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
