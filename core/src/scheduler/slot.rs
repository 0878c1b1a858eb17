//! One-shot completion slot shared by routine results, join handles and placeholders

use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

use super::lock;

/// Result of a non-blocking take
pub(crate) enum Take<T> {
    Pending,
    Ready(T),
    /// The value was completed and already taken
    Taken,
}

pub(crate) struct OneShot<T> {
    state: Mutex<OneShotState<T>>,
}

struct OneShotState<T> {
    value: Option<T>,
    completed: bool,
    waker: Option<Waker>,
}

impl<T> OneShot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(OneShotState {
                value: None,
                completed: false,
                waker: None,
            }),
        }
    }

    /// Store the value; only the first completion wins
    pub(crate) fn complete(&self, value: T) -> bool {
        let waker = {
            let mut state = lock(&self.state);
            if state.completed {
                return false;
            }
            state.completed = true;
            state.value = Some(value);
            state.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_completed(&self) -> bool {
        lock(&self.state).completed
    }

    pub(crate) fn try_take(&self) -> Take<T> {
        let mut state = lock(&self.state);
        match state.value.take() {
            Some(value) => Take::Ready(value),
            None if state.completed => Take::Taken,
            None => Take::Pending,
        }
    }

    /// Take the value, or register the waker to be woken on completion
    ///
    /// Resolves to `None` if the value was already taken.
    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = lock(&self.state);
        if let Some(value) = state.value.take() {
            return Poll::Ready(Some(value));
        }
        if state.completed {
            return Poll::Ready(None);
        }

        match &state.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}
