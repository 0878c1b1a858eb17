//! Tests for waker-driven posting and the inline execution policy

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::error::{ContinuationError, DrainError};
use crate::placeholder::{self, Resolver};
use crate::scheduler::{OperationHandle, OperationKind};
use crate::test_helpers::{inline_engine, test_engine};

/// A task that counts its polls and waits on a gate in between
fn gated_task(polls: &Arc<AtomicUsize>) -> (Arc<Task>, Resolver<()>) {
    let (gate, placeholder) = placeholder::external::<()>("gate");
    let polls = Arc::clone(polls);

    let task = Task::new(
        OperationHandle::new(OperationKind::Task),
        Box::pin(async move {
            polls.fetch_add(1, Ordering::SeqCst);
            let _ = placeholder.await;
            polls.fetch_add(1, Ordering::SeqCst);
        }),
        Box::new(|_: &str| {}),
    );
    (task, gate)
}

#[test]
fn test_concurrency_ceiling_is_one() {
    let ctx = test_engine().new_context();
    assert_eq!(ctx.adapter().max_concurrency(), 1);
    assert_eq!(SchedulerAdapter::MAX_CONCURRENCY, 1);
}

#[test]
fn test_wake_posts_without_running() {
    let ctx = test_engine().new_context();
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, gate) = gated_task(&polls);

    task.run(&ctx).unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 1);
    assert!(ctx.is_empty());

    gate.resolve(());
    assert_eq!(polls.load(Ordering::SeqCst), 1);
    assert_eq!(
        ctx.adapter().scheduled_operations(&ctx),
        vec![task.operation().clone()]
    );

    ctx.drain().unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_duplicate_wakes_are_harmless() {
    let ctx = test_engine().new_context();
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, gate) = gated_task(&polls);

    task.run(&ctx).unwrap();
    gate.resolve(());
    ctx.adapter().waker_for(&ctx, &task).wake_by_ref();
    assert_eq!(ctx.len(), 2);

    ctx.drain().unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_schedule_queues_by_default() {
    let ctx = test_engine().new_context();
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, _gate) = gated_task(&polls);

    let _ambient = ambient::enter(&ctx);
    ctx.adapter().schedule(&ctx, task);

    assert_eq!(polls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.len(), 1);
}

#[test]
fn test_inline_requires_current_context() {
    let ctx = inline_engine().new_context();
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, _gate) = gated_task(&polls);

    assert!(!ctx.adapter().try_execute_inline(&ctx, &task, false).unwrap());
    assert_eq!(polls.load(Ordering::SeqCst), 0);

    let _ambient = ambient::enter(&ctx);
    assert!(!ctx.adapter().try_execute_inline(&ctx, &task, true).unwrap());
    assert!(ctx.adapter().try_execute_inline(&ctx, &task, false).unwrap());
    assert_eq!(polls.load(Ordering::SeqCst), 1);
    assert!(ctx.is_empty());
}

#[test]
fn test_inline_not_allowed_for_another_context() {
    let ctx = inline_engine().new_context();
    let other = inline_engine().new_context();
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, _gate) = gated_task(&polls);

    let _ambient = ambient::enter(&other);
    ctx.adapter().schedule(&ctx, task);

    assert_eq!(polls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.len(), 1);
    assert!(other.is_empty());
}

#[test]
fn test_wake_after_context_dropped_is_ignored() {
    let polls = Arc::new(AtomicUsize::new(0));
    let (task, gate) = gated_task(&polls);
    {
        let ctx = test_engine().new_context();
        task.run(&ctx).unwrap();
    }

    assert!(gate.resolve(()));
    assert_eq!(polls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_queued_task_rejects_foreign_state() {
    let ctx = test_engine().new_context();
    let err = run_queued_task(&ctx, Box::new(42u8)).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<EngineDefect>(),
        Some(EngineDefect(EngineError::InvariantViolation(_)))
    ));
}

#[test]
fn test_failed_inline_task_is_reported_by_drain() {
    let ctx = inline_engine().new_context();
    let task = Task::new(
        OperationHandle::with_label(OperationKind::Task, "inline"),
        Box::pin(async {
            panic!("inline child exploded");
        }),
        Box::new(|_: &str| {}),
    );
    let operation = task.operation().clone();

    {
        let _ambient = ambient::enter(&ctx);
        ctx.adapter().schedule(&ctx, task);
    }
    assert_eq!(ctx.list_pending_operations(), vec![operation.clone()]);

    match ctx.drain() {
        Err(DrainError::Continuation(failure @ ContinuationError::Panicked { .. })) => {
            assert_eq!(failure.operation(), Some(&operation));
        }
        other => panic!("expected panicked continuation, got {:?}", other),
    }
}
