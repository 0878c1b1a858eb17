//! Routine handles
//!
//! A routine is one unit of user async logic bound to its own
//! `SchedulingContext`. Starting it runs the synchronous prefix on the
//! caller's thread; everything after the first suspension runs only when the
//! host pumps the handle.
//!
//! ```text
//! Created ──start──► Running ──pump…──► Succeeded | Failed | Cancelled
//!    │
//!    └──(token already cancelled)──► Cancelled
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::Engine;
use crate::error::{Cancelled, DrainError, EngineError, RoutineError, StartError};
use crate::scheduler::bridge::EngineDefect;
use crate::scheduler::slot::{OneShot, Take};
use crate::scheduler::task::Task;
use crate::scheduler::{ambient, lock, panic_message};
use crate::scheduler::{OperationHandle, OperationKind, SchedulingContext};

/* ===================== Status ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RoutineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RoutineStatus::Succeeded | RoutineStatus::Failed | RoutineStatus::Cancelled
        )
    }
}

/// Result cell of one routine; the terminal state is set exactly once
struct RoutineCell<T> {
    status: Mutex<RoutineStatus>,
    outcome: OneShot<Result<T, RoutineError>>,
}

impl<T> RoutineCell<T> {
    fn new() -> Self {
        Self {
            status: Mutex::new(RoutineStatus::Created),
            outcome: OneShot::new(),
        }
    }

    fn status(&self) -> RoutineStatus {
        *lock(&self.status)
    }

    fn set_running(&self) {
        let mut status = lock(&self.status);
        if *status == RoutineStatus::Created {
            *status = RoutineStatus::Running;
        }
    }

    fn finish(&self, outcome: Result<T, RoutineError>) -> bool {
        let mut status = lock(&self.status);
        if status.is_terminal() {
            return false;
        }

        let terminal = match &outcome {
            Ok(_) => RoutineStatus::Succeeded,
            Err(RoutineError::Cancelled) => RoutineStatus::Cancelled,
            Err(_) => RoutineStatus::Failed,
        };
        self.outcome.complete(outcome);
        *status = terminal;
        true
    }
}

/* ===================== Routine ===================== */

/// Handle to a started routine
pub struct Routine<T> {
    context: SchedulingContext,
    cell: Arc<RoutineCell<T>>,
    cancel: CancellationToken,
    operation: OperationHandle,
}

impl<T: Send + 'static> Routine<T> {
    /// Start a routine on its own fresh scheduling context
    ///
    /// If `cancel` is already cancelled, `routine_fn` is never called and the
    /// routine is immediately `Cancelled`. Otherwise `routine_fn` is called
    /// and its future polled once on this thread before returning.
    pub(crate) fn start<A, F, Fut>(
        context: SchedulingContext,
        routine_fn: F,
        argument: A,
        cancel: CancellationToken,
    ) -> Self
    where
        F: FnOnce(A, CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let routine = Self::prepare(context, cancel.clone());
        if routine.cancel_before_start() {
            return routine;
        }

        let started: Result<(), Infallible> =
            routine.run_prefix(move || Ok(routine_fn(argument, cancel)));
        if let Err(never) = started {
            match never {}
        }
        routine
    }

    /// Like `start`, for routine functions that may fail to produce a future
    ///
    /// A function returning `None` is a programming error, reported here
    /// rather than through the routine's result.
    pub(crate) fn try_start<A, F, Fut>(
        context: SchedulingContext,
        routine_fn: F,
        argument: A,
        cancel: CancellationToken,
    ) -> Result<Self, StartError>
    where
        F: FnOnce(A, CancellationToken) -> Option<Fut>,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let routine = Self::prepare(context, cancel.clone());
        if routine.cancel_before_start() {
            return Ok(routine);
        }

        let name = routine.operation.to_string();
        routine.run_prefix(move || {
            routine_fn(argument, cancel).ok_or(StartError::MissingComputation { routine: name })
        })?;
        Ok(routine)
    }

    fn prepare(context: SchedulingContext, cancel: CancellationToken) -> Self {
        Self {
            context,
            cell: Arc::new(RoutineCell::new()),
            cancel,
            operation: OperationHandle::new(OperationKind::Routine),
        }
    }

    fn cancel_before_start(&self) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }

        debug!(routine = %self.operation, "cancelled before start; routine function not invoked");
        self.cell.finish(Err(RoutineError::Cancelled));
        true
    }

    /// Invoke the routine function and poll its future once, under the context
    fn run_prefix<Fut, E, P>(&self, produce: P) -> Result<(), E>
    where
        P: FnOnce() -> Result<Fut, E>,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        E: fmt::Display,
    {
        let _exclusive = self.context.lock_drain();
        let _ambient = ambient::enter(&self.context);
        // Unreachable through `Engine::start`: the context is fresh and its
        // drain lock is held. The defect is handed to the next pump rather than
        // stored as the routine's result, and the routine stays `Created`.
        let _execution = match self.context.begin_execution() {
            Ok(guard) => guard,
            Err(defect) => {
                error!(routine = %self.operation, error = %defect, "engine defect while starting routine");
                self.context.post_fn(
                    move |_| Err(EngineDefect(defect).into()),
                    Some(self.operation.clone()),
                );
                return Ok(());
            }
        };

        self.cell.set_running();
        debug!(routine = %self.operation, context = %self.context, "routine started");

        let future = match panic::catch_unwind(AssertUnwindSafe(produce)) {
            Ok(Ok(future)) => future,
            Ok(Err(err)) => {
                error!(routine = %self.operation, error = %err, "routine function returned no computation");
                return Err(err);
            }
            Err(payload) => {
                self.cell
                    .finish(Err(RoutineError::Panicked(panic_message(payload.as_ref()))));
                return Ok(());
            }
        };

        let task = self.root_task(future);
        if let Err(err) = task.run(&self.context) {
            // Already recorded on the cell by the task's panic hook
            debug!(routine = %self.operation, error = %err, "routine failed during its synchronous prefix");
        }
        Ok(())
    }

    fn root_task<Fut>(&self, future: Fut) -> Arc<Task>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cell = Arc::clone(&self.cell);
        let panic_cell = Arc::clone(&self.cell);
        let token = self.cancel.clone();

        Task::new(
            self.operation.clone(),
            Box::pin(async move {
                let outcome = future.await;
                cell.finish(classify_outcome(outcome, &token));
            }),
            Box::new(move |message: &str| {
                panic_cell.finish(Err(RoutineError::Panicked(message.to_string())));
            }),
        )
    }
}

fn classify_outcome<T>(outcome: anyhow::Result<T>, token: &CancellationToken) -> Result<T, RoutineError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(err) if token.is_cancelled() && err.is::<Cancelled>() => Err(RoutineError::Cancelled),
        Err(err) => Err(RoutineError::Failed(err)),
    }
}

impl<T> Routine<T> {
    /// Run every queued continuation of this routine
    ///
    /// A no-op when nothing is queued. Call repeatedly, typically once per
    /// external event, until `is_completed` returns true.
    pub fn pump(&self) -> Result<(), DrainError> {
        self.context.drain()
    }

    pub fn status(&self) -> RoutineStatus {
        self.cell.status()
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// Future resolving to the routine's outcome
    ///
    /// Only resolves once some `pump` call completes the routine. Awaiting it
    /// from code that never pumps this routine waits forever.
    pub fn result(&self) -> RoutineResult<T> {
        RoutineResult {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Take the outcome if the routine has finished
    pub fn try_result(&self) -> Option<Result<T, RoutineError>> {
        match self.cell.outcome.try_take() {
            Take::Pending => None,
            Take::Ready(outcome) => Some(outcome),
            Take::Taken => Some(Err(RoutineError::ResultTaken)),
        }
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.context
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn operation(&self) -> &OperationHandle {
        &self.operation
    }

    /// Operations queued on this routine's context right now
    pub fn pending_operations(&self) -> Vec<OperationHandle> {
        self.context.list_pending_operations()
    }
}

impl<T> fmt::Display for Routine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.operation, self.context)
    }
}

impl<T> fmt::Debug for Routine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine")
            .field("operation", &self.operation)
            .field("status", &self.status())
            .field("context", &self.context)
            .finish()
    }
}

/// Future returned by [`Routine::result`]
pub struct RoutineResult<T> {
    cell: Arc<RoutineCell<T>>,
}

impl<T> Future for RoutineResult<T> {
    type Output = Result<T, RoutineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.cell
            .outcome
            .poll_take(cx)
            .map(|outcome| outcome.unwrap_or(Err(RoutineError::ResultTaken)))
    }
}

/* ===================== Helpers ===================== */

/// Start a routine on the process-wide engine
pub fn start<A, F, Fut, T>(
    routine_fn: F,
    argument: A,
    cancel: CancellationToken,
) -> Result<Routine<T>, EngineError>
where
    F: FnOnce(A, CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    Ok(Engine::shared()?.start(routine_fn, argument, cancel))
}

/// Cooperative cancellation check for routine code
///
/// Returning the error from a routine whose token is cancelled ends the
/// routine in the `Cancelled` state.
pub fn check_cancelled(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[path = "routine_tests.rs"]
mod tests;
