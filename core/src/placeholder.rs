//! Completion placeholders
//!
//! A placeholder stands in for an external event a routine waits on: an
//! activity result, a timer firing, an incoming signal. The routine awaits
//! the [`Placeholder`]; the host keeps the [`Resolver`] and completes it when
//! the event arrives. Completing it only posts the waiting continuation onto
//! the routine's context, so the routine advances on the next pump.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, trace};

use crate::error::PlaceholderError;
use crate::scheduler::slot::OneShot;
use crate::scheduler::{OperationHandle, OperationKind};

type Slot<T> = Arc<OneShot<Result<T, PlaceholderError>>>;

/// Create a connected resolver/placeholder pair for `operation`
pub fn pair<T>(operation: OperationHandle) -> (Resolver<T>, Placeholder<T>) {
    let slot: Slot<T> = Arc::new(OneShot::new());
    trace!(operation = %operation, "placeholder created");

    (
        Resolver {
            slot: Arc::clone(&slot),
            operation: operation.clone(),
        },
        Placeholder { slot, operation },
    )
}

pub fn activity<T>(name: &str) -> (Resolver<T>, Placeholder<T>) {
    pair(OperationHandle::with_label(OperationKind::Activity, name))
}

pub fn timer<T>(label: &str) -> (Resolver<T>, Placeholder<T>) {
    pair(OperationHandle::with_label(OperationKind::Timer, label))
}

pub fn signal<T>(name: &str) -> (Resolver<T>, Placeholder<T>) {
    pair(OperationHandle::with_label(OperationKind::Signal, name))
}

pub fn external<T>(label: &str) -> (Resolver<T>, Placeholder<T>) {
    pair(OperationHandle::with_label(OperationKind::External, label))
}

/* ===================== Resolver ===================== */

/// Host side of a placeholder
///
/// Only the first of `resolve`, `reject` or `cancel` has any effect. Dropping
/// an unresolved resolver completes the placeholder with
/// [`PlaceholderError::Abandoned`].
pub struct Resolver<T> {
    slot: Slot<T>,
    operation: OperationHandle,
}

impl<T> Resolver<T> {
    pub fn resolve(&self, value: T) -> bool {
        self.complete(Ok(value), "resolved")
    }

    pub fn reject(&self, error: impl Into<anyhow::Error>) -> bool {
        self.complete(Err(PlaceholderError::Rejected(error.into())), "rejected")
    }

    pub fn cancel(&self) -> bool {
        self.complete(Err(PlaceholderError::Cancelled), "cancelled")
    }

    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }

    pub fn operation(&self) -> &OperationHandle {
        &self.operation
    }

    fn complete(&self, outcome: Result<T, PlaceholderError>, how: &str) -> bool {
        let completed = self.slot.complete(outcome);
        if completed {
            debug!(operation = %self.operation, how, "placeholder completed");
        } else {
            trace!(operation = %self.operation, how, "placeholder already completed; ignoring");
        }
        completed
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.slot.complete(Err(PlaceholderError::Abandoned)) {
            debug!(operation = %self.operation, "resolver dropped before completion");
        }
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("operation", &self.operation)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/* ===================== Placeholder ===================== */

/// Routine side of a placeholder
#[must_use = "futures do nothing unless awaited"]
pub struct Placeholder<T> {
    slot: Slot<T>,
    operation: OperationHandle,
}

impl<T> Placeholder<T> {
    pub fn operation(&self) -> &OperationHandle {
        &self.operation
    }

    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }
}

impl<T> Future for Placeholder<T> {
    type Output = Result<T, PlaceholderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A placeholder is awaited once; a second await sees it abandoned
        self.slot
            .poll_take(cx)
            .map(|outcome| outcome.unwrap_or(Err(PlaceholderError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_first_completion_wins() {
        let (resolver, placeholder) = activity::<u32>("charge-card");
        let mut waiting = task::spawn(placeholder);
        assert_pending!(waiting.poll());

        assert!(resolver.resolve(7));
        assert!(!resolver.reject(anyhow::anyhow!("too late")));
        assert!(!resolver.cancel());

        assert!(waiting.is_woken());
        assert_eq!(assert_ready!(waiting.poll()).unwrap(), 7);
    }

    #[test]
    fn test_reject_carries_error() {
        let (resolver, placeholder) = timer::<()>("backoff");
        resolver.reject(anyhow::anyhow!("clock went backwards"));

        let mut waiting = task::spawn(placeholder);
        match assert_ready!(waiting.poll()) {
            Err(PlaceholderError::Rejected(err)) => {
                assert_eq!(err.to_string(), "clock went backwards")
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel() {
        let (resolver, placeholder) = signal::<String>("approve");
        assert!(resolver.cancel());
        assert!(resolver.is_completed());

        let mut waiting = task::spawn(placeholder);
        assert!(matches!(
            assert_ready!(waiting.poll()),
            Err(PlaceholderError::Cancelled)
        ));
    }

    #[test]
    fn test_dropped_resolver_abandons_placeholder() {
        let (resolver, placeholder) = external::<u8>("webhook");
        let mut waiting = task::spawn(placeholder);
        assert_pending!(waiting.poll());

        drop(resolver);

        assert!(waiting.is_woken());
        assert!(matches!(
            assert_ready!(waiting.poll()),
            Err(PlaceholderError::Abandoned)
        ));
    }

    #[test]
    fn test_resolved_then_dropped_keeps_value() {
        let (resolver, placeholder) = activity::<&str>("lookup");
        resolver.resolve("found");
        drop(resolver);

        let mut waiting = task::spawn(placeholder);
        assert_eq!(assert_ready!(waiting.poll()).unwrap(), "found");
    }

    #[test]
    fn test_operation_is_shared_by_both_sides() {
        let (resolver, placeholder) = activity::<()>("ship");
        assert_eq!(resolver.operation(), placeholder.operation());
        assert_eq!(placeholder.operation().kind(), OperationKind::Activity);
        assert_eq!(placeholder.operation().label(), Some("ship"));
    }
}
