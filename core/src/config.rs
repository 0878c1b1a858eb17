//! Engine configuration
//!
//! Values are layered, later sources winning:
//! 1. built-in defaults
//! 2. an optional config file (`config_path` on the builder, or `ROUTINE_CONFIG_PATH`)
//! 3. environment variables prefixed with `ROUTINE__` (e.g. `ROUTINE__WORKER_THREADS=4`)
//! 4. explicit builder overrides
//!
//! A `.env` file in the working directory is loaded before the environment is read.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::EngineError;

/// Environment variable naming a config file
pub const CONFIG_PATH_ENV: &str = "ROUTINE_CONFIG_PATH";

const ENV_PREFIX: &str = "ROUTINE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Core threads of the shared worker pool
    pub worker_threads: usize,

    /// Upper bound on threads borrowed for continuation dispatch
    pub max_blocking_threads: usize,

    /// Name given to worker pool threads
    pub thread_name: String,

    /// Allow a newly spawned task to run inline when the spawning thread is
    /// already draining the same context. Off by default: every
    /// continuation then runs only from an explicit drain.
    pub permit_inline_execution: bool,

    /// Cap on work items executed by a single drain. `None` drains to exhaustion.
    pub max_drain_iterations: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 64,
            thread_name: "routine-worker".to_string(),
            permit_inline_execution: false,
            max_drain_iterations: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load configuration from file and environment with no overrides
    pub fn load() -> Result<Self, EngineError> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.worker_threads == 0 {
            return Err(EngineError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.max_blocking_threads == 0 {
            return Err(EngineError::InvalidConfig(
                "max_blocking_threads must be at least 1".to_string(),
            ));
        }
        if self.max_drain_iterations == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_drain_iterations must be at least 1 when set".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/* ===================== Builder ===================== */

pub struct EngineConfigBuilder {
    config_path: Option<PathBuf>,
    read_environment: bool,
    worker_threads: Option<usize>,
    permit_inline_execution: Option<bool>,
    max_drain_iterations: Option<usize>,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            read_environment: true,
            worker_threads: None,
            permit_inline_execution: None,
            max_drain_iterations: None,
        }
    }
}

impl EngineConfigBuilder {
    /// Config file to load (overrides `ROUTINE_CONFIG_PATH`)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Whether `.env`, `ROUTINE_CONFIG_PATH` and `ROUTINE__*` are consulted
    pub fn read_environment(mut self, read: bool) -> Self {
        self.read_environment = read;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn permit_inline_execution(mut self, permit: bool) -> Self {
        self.permit_inline_execution = Some(permit);
        self
    }

    pub fn max_drain_iterations(mut self, limit: usize) -> Self {
        self.max_drain_iterations = Some(limit);
        self
    }

    pub fn build(self) -> Result<EngineConfig, EngineError> {
        if self.read_environment {
            dotenvy::dotenv().ok();
        }

        let config_path = self.config_path.or_else(|| {
            if self.read_environment {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            } else {
                None
            }
        });

        let defaults = EngineConfig::default();
        let mut sources = config::Config::builder()
            .set_default("worker_threads", defaults.worker_threads as i64)?
            .set_default("max_blocking_threads", defaults.max_blocking_threads as i64)?
            .set_default("thread_name", defaults.thread_name.clone())?
            .set_default("permit_inline_execution", defaults.permit_inline_execution)?;

        if let Some(path) = &config_path {
            sources = sources.add_source(config::File::from(path.as_path()).required(true));
        }

        if self.read_environment {
            sources = sources.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let mut config: EngineConfig = sources.build()?.try_deserialize()?;

        if let Some(threads) = self.worker_threads {
            config.worker_threads = threads;
        }
        if let Some(permit) = self.permit_inline_execution {
            config.permit_inline_execution = permit;
        }
        if let Some(limit) = self.max_drain_iterations {
            config.max_drain_iterations = Some(limit);
        }

        config.validate()?;
        Ok(config)
    }
}
