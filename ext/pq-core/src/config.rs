//! Engine configuration

use std::time::Duration;

use crate::logger::LogLevel;

// Default configuration constants
pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 32 * 1024 * 1024; // 32MB
pub const DEFAULT_MIN_WAVE_ROWS: usize = 16_000;
pub const DEFAULT_RESIZE_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_BINARY_CHUNK_SIZE: usize = 8192;

/// Environment variable overriding the default worker count
pub const MAX_THREADS_ENV: &str = "PQ_MAX_THREADS";

/// Worker count from `PQ_MAX_THREADS`, else the machine's available parallelism
pub fn default_thread_count() -> usize {
    std::env::var(MAX_THREADS_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|&threads| threads > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

/// Tunables shared by every call made through one engine context
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_budget_bytes: usize,
    pub min_wave_rows: usize,
    pub resize_grace: Duration,
    pub shutdown_grace: Duration,
    pub binary_chunk_size: usize,
    pub default_threads: usize,
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EngineConfig {
    /// Defaults with the thread count and log level taken from the environment
    pub fn from_env() -> Self {
        Self {
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            min_wave_rows: DEFAULT_MIN_WAVE_ROWS,
            resize_grace: DEFAULT_RESIZE_GRACE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            binary_chunk_size: DEFAULT_BINARY_CHUNK_SIZE,
            default_threads: default_thread_count(),
            log_level: LogLevel::from_env(),
        }
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for creating a configured [`EngineConfig`]
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes a wave's regular columns may occupy
    pub fn cache_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.cache_budget_bytes = bytes.max(1);
        self
    }

    /// Lower clamp on the rows per wave
    pub fn min_wave_rows(mut self, rows: usize) -> Self {
        self.config.min_wave_rows = rows.max(1);
        self
    }

    pub fn resize_grace(mut self, grace: Duration) -> Self {
        self.config.resize_grace = grace;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Scratch buffer size for streaming binary cells
    pub fn binary_chunk_size(mut self, size: usize) -> Self {
        self.config.binary_chunk_size = size.max(1);
        self
    }

    /// Worker count used when a call asks for 0 threads
    pub fn default_threads(mut self, threads: usize) -> Self {
        self.config.default_threads = threads.max(1);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
