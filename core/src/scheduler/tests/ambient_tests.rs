//! Tests for the thread's current scheduling context

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use super::ambient;
use crate::test_helpers::test_engine;

#[test]
fn test_no_context_by_default() {
    thread::spawn(|| assert!(ambient::current().is_none()))
        .join()
        .unwrap();
}

#[test]
fn test_enter_installs_and_guard_restores() {
    let ctx = test_engine().new_context();
    {
        let _guard = ambient::enter(&ctx);
        assert!(ambient::is_current(&ctx));
        assert_eq!(ambient::current().map(|current| current.id()), Some(ctx.id()));
    }
    assert!(!ambient::is_current(&ctx));
    assert!(ambient::current().is_none());
}

#[test]
fn test_nested_enter_restores_outer() {
    let outer = test_engine().new_context();
    let inner = test_engine().new_context();

    let _outer = ambient::enter(&outer);
    {
        let _inner = ambient::enter(&inner);
        assert!(ambient::is_current(&inner));
        assert!(!ambient::is_current(&outer));
    }
    assert!(ambient::is_current(&outer));
}

#[test]
fn test_reentering_current_context_keeps_it_installed() {
    let ctx = test_engine().new_context();
    let _outer = ambient::enter(&ctx);
    {
        let _again = ambient::enter(&ctx);
        assert!(ambient::is_current(&ctx));
    }
    // The inner guard must not uninstall what the outer one installed
    assert!(ambient::is_current(&ctx));
}

#[test]
fn test_copy_is_a_different_context() {
    let ctx = test_engine().new_context();
    let copy = ctx.copy();

    let _guard = ambient::enter(&ctx);
    assert!(!ambient::is_current(&copy));
}

#[test]
fn test_restored_after_panic() {
    let ctx = test_engine().new_context();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = ambient::enter(&ctx);
        panic!("user code blew up");
    }));

    assert!(result.is_err());
    assert!(ambient::current().is_none());
}
