//! Tests for the invocation hand-off and the dispatch bridge

use std::sync::{Arc, Mutex};
use std::thread;

use super::*;
use crate::scheduler::WorkState;
use crate::test_helpers::test_engine;

fn item<F>(continuation: F) -> WorkItem
where
    F: FnOnce(&SchedulingContext, WorkState) -> anyhow::Result<()> + Send + 'static,
{
    WorkItem::new(Box::new(continuation), Box::new(()), None)
}

fn noop_item() -> WorkItem {
    item(|_, _| Ok(()))
}

fn bridge() -> DispatchBridge {
    DispatchBridge::new(WorkerPool::new(&EngineConfig::default()).unwrap())
}

#[test]
fn test_dispatch_runs_item_on_another_thread() {
    let ctx = test_engine().new_context();
    let bridge = bridge();
    let invocation = InvocationState::new();
    let ran_on = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&ran_on);
    let recorded = item(move |_, _| {
        *sink.lock().unwrap() = Some(thread::current().id());
        Ok(())
    });

    bridge.dispatch(&ctx, recorded, &invocation).unwrap();

    let worker = ran_on.lock().unwrap().take().unwrap();
    assert_ne!(worker, thread::current().id());
}

#[test]
fn test_invocation_state_is_reusable() {
    let ctx = test_engine().new_context();
    let bridge = bridge();
    let invocation = InvocationState::new();

    for _ in 0..3 {
        bridge.dispatch(&ctx, noop_item(), &invocation).unwrap();
    }
}

#[test]
fn test_reset_while_in_flight_is_a_defect() {
    let invocation = InvocationState::new();
    invocation.reset(noop_item()).unwrap();

    assert!(matches!(
        invocation.reset(noop_item()),
        Err(EngineError::InvariantViolation(_))
    ));
}

#[test]
fn test_stale_generation_cannot_complete_next_item() {
    let invocation = InvocationState::new();

    let first = invocation.reset(noop_item()).unwrap();
    assert!(invocation.try_set_succeeded(first));
    assert!(invocation.wait_for_completion().is_ok());

    let second = invocation.reset(noop_item()).unwrap();
    assert!(invocation.take_item(first).is_none());
    assert!(!invocation.try_set_failed(
        first,
        DispatchError::Engine(EngineError::InvariantViolation("late".to_string()))
    ));

    assert!(invocation.take_item(second).is_some());
    assert!(invocation.try_set_succeeded(second));
    assert!(!invocation.try_set_succeeded(second));
    assert!(invocation.wait_for_completion().is_ok());
}

#[test]
fn test_dropped_job_reports_defect() {
    let invocation = InvocationState::new();
    let generation = invocation.reset(noop_item()).unwrap();

    drop(CompletionGuard {
        state: Arc::clone(&invocation),
        generation,
    });

    assert!(matches!(
        invocation.wait_for_completion(),
        Err(DispatchError::Engine(EngineError::InvariantViolation(_)))
    ));
}

#[test]
fn test_dispatch_reports_user_failure() {
    let ctx = test_engine().new_context();
    let bridge = bridge();
    let invocation = InvocationState::new();

    let failing = item(|_, _| Err(anyhow::anyhow!("activity timed out")));

    match bridge.dispatch(&ctx, failing, &invocation) {
        Err(DispatchError::Continuation(ContinuationError::Failed(err))) => {
            assert_eq!(err.to_string(), "activity timed out")
        }
        other => panic!("expected continuation failure, got {:?}", other),
    }
}

#[test]
fn test_classify_failure() {
    assert!(matches!(
        classify_failure(EngineDefect(EngineError::NoAmbientContext).into()),
        DispatchError::Engine(EngineError::NoAmbientContext)
    ));

    // Raised by user code, so not a defect
    match classify_failure(EngineError::NoAmbientContext.into()) {
        DispatchError::Continuation(ContinuationError::Failed(err)) => assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NoAmbientContext)
        )),
        other => panic!("expected continuation failure, got {:?}", other),
    }

    let panicked = ContinuationError::Panicked {
        message: "inner".to_string(),
        operation: None,
    };
    assert!(matches!(
        classify_failure(panicked.into()),
        DispatchError::Continuation(ContinuationError::Panicked { .. })
    ));

    assert!(matches!(
        classify_failure(anyhow::anyhow!("plain")),
        DispatchError::Continuation(ContinuationError::Failed(_))
    ));
}

#[test]
fn test_run_in_context_restores_ambient() {
    let outer = test_engine().new_context();
    let inner = test_engine().new_context();
    let _outer = ambient::enter(&outer);

    let seen_inner = Arc::new(Mutex::new(false));
    let sink = Arc::clone(&seen_inner);
    let check = item(move |ctx, _| {
        *sink.lock().unwrap() = ambient::is_current(ctx);
        Ok(())
    });

    run_in_context(&inner, check).unwrap();

    assert!(*seen_inner.lock().unwrap());
    assert!(ambient::is_current(&outer));
}
