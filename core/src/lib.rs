//! Deterministic routine engine
//!
//! Async routines whose continuations run only when the host asks. Each
//! routine owns a [`SchedulingContext`]: every resumption is posted to that
//! context's queue, and nothing runs until the host pumps the routine. Items
//! of one context run one at a time, in post order, on a thread borrowed
//! from a shared worker pool.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod init;
pub mod placeholder;
pub mod routine;
pub mod scenario;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{
    AggregateError, Cancelled, ContinuationError, DrainError, EngineError, JoinError,
    PlaceholderError, RoutineError, StartError,
};
pub use init::{initialize, InitBuilder, InitOptions};
pub use placeholder::{Placeholder, Resolver};
pub use routine::{check_cancelled, Routine, RoutineResult, RoutineStatus};
pub use scheduler::{spawn, yield_now, JoinHandle, OperationHandle, OperationKind, SchedulingContext};
