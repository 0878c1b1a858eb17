//! Shared engines for unit tests

use std::sync::OnceLock;

use crate::config::EngineConfig;
use crate::engine::Engine;

fn build(config: EngineConfig) -> Engine {
    Engine::new(config).expect("test engine should build")
}

/// Engine with default policy: every continuation waits for a drain
pub(crate) fn test_engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| build(EngineConfig::default()))
}

/// Engine whose adapter runs newly spawned tasks inline
pub(crate) fn inline_engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        build(EngineConfig {
            permit_inline_execution: true,
            ..EngineConfig::default()
        })
    })
}

/// Engine that runs at most `limit` items per drain
pub(crate) fn capped_engine(limit: usize) -> Engine {
    build(EngineConfig {
        worker_threads: 1,
        max_drain_iterations: Some(limit),
        ..EngineConfig::default()
    })
}
