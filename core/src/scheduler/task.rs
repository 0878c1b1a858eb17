//! Tasks bound to a scheduling context
//!
//! A task owns one boxed future. Running it polls the future once with a
//! waker from the context's adapter; waking that waker posts the task again.
//! Root routine futures and spawned child futures are both tasks.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tracing::trace;

use super::ambient;
use super::context::SchedulingContext;
use super::operation::{OperationHandle, OperationKind};
use super::slot::OneShot;
use super::{lock, panic_message};
use crate::error::{ContinuationError, EngineError, JoinError};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Called with the panic message when polling the future panics
pub(crate) type PanicHook = Box<dyn Fn(&str) + Send + Sync + 'static>;

pub(crate) struct Task {
    operation: OperationHandle,
    future: Mutex<Option<BoxFuture>>,
    on_panic: PanicHook,
}

impl Task {
    pub(crate) fn new(operation: OperationHandle, future: BoxFuture, on_panic: PanicHook) -> Arc<Self> {
        Arc::new(Self {
            operation,
            future: Mutex::new(Some(future)),
            on_panic,
        })
    }

    pub(crate) fn operation(&self) -> &OperationHandle {
        &self.operation
    }

    /// Poll the future once under `ctx`
    ///
    /// A task that already finished ignores the call, so duplicate wakes are
    /// harmless. A panic drops the future, reports through the panic hook and
    /// comes back as `ContinuationError::Panicked`.
    pub(crate) fn run(self: &Arc<Self>, ctx: &SchedulingContext) -> anyhow::Result<()> {
        let mut slot = lock(&self.future);
        let Some(future) = slot.as_mut() else {
            trace!(operation = %self.operation, "task already finished; ignoring continuation");
            return Ok(());
        };

        let waker = ctx.adapter().waker_for(ctx, self);
        let mut cx = Context::from_waker(&waker);

        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(())) => {
                *slot = None;
                trace!(operation = %self.operation, "task finished");
                Ok(())
            }
            Ok(Poll::Pending) => Ok(()),
            Err(payload) => {
                *slot = None;
                drop(slot);

                let message = panic_message(payload.as_ref());
                (self.on_panic)(&message);
                Err(ContinuationError::Panicked {
                    message,
                    operation: Some(self.operation.clone()),
                }
                .into())
            }
        }
    }
}

/* ===================== Spawning ===================== */

impl SchedulingContext {
    /// Spawn a child future onto this context
    ///
    /// The future does not run until the context is drained, unless the
    /// adapter permits inline execution and the caller is already executing
    /// under this context.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let operation = OperationHandle::new(OperationKind::Task);
        let slot = Arc::new(OneShot::new());

        let output = Arc::clone(&slot);
        let on_panic = Arc::clone(&slot);
        let task = Task::new(
            operation.clone(),
            Box::pin(async move {
                let value = future.await;
                output.complete(Ok(value));
            }),
            Box::new(move |message: &str| {
                on_panic.complete(Err(JoinError::Panicked(message.to_string())));
            }),
        );

        trace!(context = %self, operation = %operation, "spawning task");
        self.adapter().schedule(self, task);

        JoinHandle { slot, operation }
    }
}

/// Spawn a child future onto the current scheduling context
pub fn spawn<F>(future: F) -> Result<JoinHandle<F::Output>, EngineError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = ambient::current().ok_or(EngineError::NoAmbientContext)?;
    Ok(ctx.spawn(future))
}

/// Handle to a spawned task's output
///
/// A task whose context is dropped before it finishes never resolves.
pub struct JoinHandle<T> {
    slot: Arc<OneShot<Result<T, JoinError>>>,
    operation: OperationHandle,
}

impl<T> JoinHandle<T> {
    pub fn operation(&self) -> &OperationHandle {
        &self.operation
    }

    pub fn is_finished(&self) -> bool {
        self.slot.is_completed()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take(cx).map(|output| {
            output.unwrap_or_else(|| {
                Err(JoinError::Panicked(
                    "join handle polled after completion".to_string(),
                ))
            })
        })
    }
}

/* ===================== Yielding ===================== */

/// Suspend once, moving the current task to the back of its context's queue
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
