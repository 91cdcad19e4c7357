//! Temp-Database Engine Factory
//!
//! Every test gets its own SQLite file in a temp directory that lives as
//! long as the `TestDb`. Engines share the directory, not the database.

use std::path::PathBuf;
use std::sync::Arc;

use contextwave_core::{Clock, EngineConfig, WaveEngine};
use tempfile::TempDir;

/// Owns the temp directory backing one or more test engines
pub struct TestDb {
    dir: TempDir,
    counter: std::sync::atomic::AtomicUsize,
}

impl TestDb {
    /// Create a fresh temp directory
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            counter: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Path for the next database file
    pub fn next_path(&self) -> PathBuf {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.dir.path().join(format!("engine-{}.db", n))
    }

    /// Engine with default configuration and the given clock
    pub fn engine(&self, clock: Arc<dyn Clock>) -> WaveEngine {
        self.engine_with(EngineConfig::default(), clock)
    }

    /// Engine with custom configuration and the given clock
    pub fn engine_with(&self, config: EngineConfig, clock: Arc<dyn Clock>) -> WaveEngine {
        WaveEngine::open(Some(self.next_path()), config)
            .expect("open engine")
            .with_clock(clock)
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}
