//! Process-wide engine initialization
//!
//! Hosts that want a single shared engine call [`initialize`] once at
//! startup. Later calls are no-ops that return the existing engine.
//!
//! # Example
//!
//! ```no_run
//! use routine_core::init::InitBuilder;
//!
//! let engine = InitBuilder::new()
//!     .worker_threads(4)
//!     .init()?;
//! # Ok::<(), routine_core::error::EngineError>(())
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::scheduler::lock;

/// Global engine
static ENGINE: OnceLock<Engine> = OnceLock::new();

/// Serializes first-time initialization so only one worker pool is built
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Options for initializing the shared engine
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides `ROUTINE_CONFIG_PATH`)
    pub config_path: Option<PathBuf>,

    pub worker_threads: Option<usize>,

    pub permit_inline_execution: Option<bool>,

    pub max_drain_iterations: Option<usize>,
}

/// Builder for constructing InitOptions
#[derive(Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.options.worker_threads = Some(threads);
        self
    }

    pub fn permit_inline_execution(mut self, permit: bool) -> Self {
        self.options.permit_inline_execution = Some(permit);
        self
    }

    pub fn max_drain_iterations(mut self, limit: usize) -> Self {
        self.options.max_drain_iterations = Some(limit);
        self
    }

    /// Initialize the shared engine with the configured options
    pub fn init(self) -> Result<&'static Engine, EngineError> {
        initialize(self.options)
    }
}

impl InitOptions {
    fn into_config(self) -> Result<EngineConfig, EngineError> {
        let mut builder = EngineConfig::builder().config_path(self.config_path);
        if let Some(threads) = self.worker_threads {
            builder = builder.worker_threads(threads);
        }
        if let Some(permit) = self.permit_inline_execution {
            builder = builder.permit_inline_execution(permit);
        }
        if let Some(limit) = self.max_drain_iterations {
            builder = builder.max_drain_iterations(limit);
        }
        builder.build()
    }
}

/// Initialize the shared engine
///
/// Loads configuration (file, environment, then `options`), builds the worker
/// pool and stores the engine globally. Calling this more than once is safe;
/// later calls return the engine built by the first.
pub fn initialize(options: InitOptions) -> Result<&'static Engine, EngineError> {
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }

    let _init = lock(&INIT_LOCK);
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }

    let engine = Engine::new(options.into_config()?)?;
    debug!("shared engine initialized");
    Ok(ENGINE.get_or_init(|| engine))
}

/// Check if the shared engine has been initialized
pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

impl Engine {
    /// The shared engine, initialized with defaults on first use
    pub fn shared() -> Result<&'static Engine, EngineError> {
        initialize(InitOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let first = InitBuilder::new().worker_threads(1).init().unwrap();
        let second = Engine::shared().unwrap();

        assert!(std::ptr::eq(first, second));
        assert!(is_initialized());
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let result = InitOptions {
            worker_threads: Some(0),
            ..InitOptions::default()
        }
        .into_config();

        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
