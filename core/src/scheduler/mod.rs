//! # Scheduler
//!
//! The deterministic scheduling core:
//!
//! - [`context`]: per-routine FIFO of posted continuations, drained on demand
//! - [`bridge`]: runs one drained item on a pool thread while the drainer waits
//! - [`adapter`]: turns waker notifications into posts on the owning context
//! - [`task`]: pollable futures bound to a context, spawning and yielding
//! - [`ambient`]: the scoped "current context" of a thread
//! - [`operation`]: handles attached to queued work for introspection

pub mod adapter;
pub mod ambient;
pub mod bridge;
pub mod context;
pub mod operation;
pub(crate) mod slot;
pub mod task;

use std::any::Any;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use adapter::SchedulerAdapter;
pub use bridge::WorkerPool;
pub use context::{Continuation, SchedulingContext, WorkItem, WorkState};
pub use operation::{OperationHandle, OperationKind};
pub use task::{spawn, yield_now, JoinHandle, YieldNow};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// User code never runs while one of the engine's own locks is held, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/ambient_tests.rs"]
mod ambient_tests;
