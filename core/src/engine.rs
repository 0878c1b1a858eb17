//! Engine - owns the shared worker pool and starts routines
//!
//! One engine is enough for a process. Every routine it starts gets a fresh
//! `SchedulingContext`; all contexts share the engine's worker pool.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, StartError};
use crate::routine::Routine;
use crate::scheduler::{SchedulingContext, WorkerPool};

pub struct Engine {
    config: EngineConfig,
    pool: WorkerPool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = WorkerPool::new(&config)?;

        info!(
            worker_threads = config.worker_threads,
            max_blocking_threads = config.max_blocking_threads,
            permit_inline_execution = config.permit_inline_execution,
            max_drain_iterations = ?config.max_drain_iterations,
            "routine engine started"
        );

        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh, empty scheduling context backed by this engine's pool
    pub fn new_context(&self) -> SchedulingContext {
        SchedulingContext::new(self.pool.clone(), &self.config)
    }

    /// Start `routine_fn(argument, cancel)` as a new routine
    ///
    /// Runs the routine's synchronous prefix before returning. The rest runs
    /// as the returned handle is pumped.
    pub fn start<A, F, Fut, T>(&self, routine_fn: F, argument: A, cancel: CancellationToken) -> Routine<T>
    where
        F: FnOnce(A, CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        Routine::start(self.new_context(), routine_fn, argument, cancel)
    }

    /// Start a routine whose function may fail to produce a computation
    ///
    /// A function that returns `None` is reported as
    /// [`StartError::MissingComputation`] instead of a failed routine.
    pub fn try_start<A, F, Fut, T>(
        &self,
        routine_fn: F,
        argument: A,
        cancel: CancellationToken,
    ) -> Result<Routine<T>, StartError>
    where
        F: FnOnce(A, CancellationToken) -> Option<Fut>,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        Routine::try_start(self.new_context(), routine_fn, argument, cancel)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
