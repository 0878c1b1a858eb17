//! Ambient scheduling context
//!
//! Every continuation receives its `SchedulingContext` explicitly. In
//! addition, the context is kept as the thread's *current* context for the
//! dynamic extent of each execution so that helpers called from deep inside
//! user code (`spawn`, `yield_now`) can find it. Installation is scoped: the
//! guard returned by [`enter`] restores the previous value when dropped,
//! including while unwinding from a panic.

use std::cell::RefCell;

use super::context::SchedulingContext;

thread_local! {
    static CURRENT: RefCell<Option<SchedulingContext>> = const { RefCell::new(None) };
}

/// The scheduling context installed on this thread, if any
pub fn current() -> Option<SchedulingContext> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Whether `ctx` is the context installed on this thread
pub fn is_current(ctx: &SchedulingContext) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|installed| installed.same_as(ctx))
    })
}

/// Install `ctx` as current until the returned guard is dropped
///
/// Re-entering the context that is already current is free: nothing is
/// swapped and the guard restores nothing.
pub(crate) fn enter(ctx: &SchedulingContext) -> AmbientGuard {
    if is_current(ctx) {
        return AmbientGuard { previous: None, installed: false };
    }

    let previous = CURRENT.with(|current| current.borrow_mut().replace(ctx.clone()));
    AmbientGuard { previous, installed: true }
}

/// Restores the previously current context on drop
#[must_use = "the context is uninstalled as soon as the guard is dropped"]
pub(crate) struct AmbientGuard {
    previous: Option<SchedulingContext>,
    installed: bool,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        if self.installed {
            let previous = self.previous.take();
            CURRENT.with(|current| *current.borrow_mut() = previous);
        }
    }
}
