//! Engine context shared by every call
//!
//! Owns the configuration, the worker pool, the logger and the registry of
//! descriptor pairs handed out by exports.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use arrow_array::RecordBatch;
use parking_lot::{Mutex, RwLock};

use crate::classify::classify_export;
use crate::config::EngineConfig;
use crate::error::Stage;
use crate::export::{export_batch, ExportRequest};
use crate::ffi::{export_record_batch, free_handles, import_record_batch, ArrowHandles};
use crate::import::{assign_batch, ImportRequest, ImportSummary};
use crate::logger::{LogSink, Logger};
use crate::pool::{PoolHandle, WorkerPool};
use crate::prescan::prescan_binary;
use crate::store::RowStore;
use crate::{Result, TransposeError};

pub struct Engine {
    config: EngineConfig,
    pool: WorkerPool,
    logger: RwLock<Logger>,
    published: Mutex<AHashSet<ArrowHandles>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("threads", &self.pool.current_threads())
            .field("published", &self.published.lock().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::from_env())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let logger = Logger::new(None, config.log_level);
        Self {
            pool: WorkerPool::new(config.resize_grace, config.shutdown_grace),
            config,
            logger: RwLock::new(logger),
            published: Mutex::new(AHashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> Logger {
        self.logger.read().clone()
    }

    /// Route log lines to `sink` from now on
    pub fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        let mut logger = self.logger.write();
        *logger = logger.with_sink(sink);
    }

    /// Send log lines back to stderr
    pub fn clear_log_sink(&self) {
        let mut logger = self.logger.write();
        *logger = logger.without_sink();
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransposeError::Unavailable)
        }
    }

    /// Worker count for a call; 0 means the configured default
    pub fn resolve_threads(&self, requested: usize) -> usize {
        if requested == 0 {
            self.config.default_threads
        } else {
            requested
        }
    }

    fn pool_for(&self, requested: usize, logger: &Logger) -> Result<PoolHandle> {
        self.pool.acquire(self.resolve_threads(requested), logger)
    }

    /// Copy `batch` into `store` starting at `request.base_row`
    pub fn assign_batch<S: RowStore + ?Sized>(
        &self,
        store: &S,
        batch: &RecordBatch,
        request: &ImportRequest,
    ) -> Result<ImportSummary> {
        self.ensure_open()?;
        let logger = self.logger();
        let run = || {
            let pool = self.pool_for(request.threads, &logger)?;
            assign_batch(store, batch, request, &pool, &self.config, &logger)
        };
        run().map_err(|e| e.in_stage(Stage::Import))
    }

    /// Import a foreign descriptor pair, then copy it into `store`
    ///
    /// A non-null pair is consumed before anything else is checked: on return
    /// both foreign structs are released, whether or not the call succeeded.
    ///
    /// # Safety
    ///
    /// `handles` must address valid, unreleased Arrow C data interface structs
    /// describing a struct array.
    pub unsafe fn assign_handles<S: RowStore + ?Sized>(
        &self,
        store: &S,
        handles: ArrowHandles,
        request: &ImportRequest,
    ) -> Result<ImportSummary> {
        let batch = import_record_batch(handles).map_err(|e| e.in_stage(Stage::Handoff))?;
        self.assign_batch(store, &batch, request)
    }

    /// Build a new batch from `store`
    pub fn export_batch<S: RowStore + ?Sized>(
        &self,
        store: &S,
        request: &ExportRequest,
    ) -> Result<RecordBatch> {
        self.ensure_open()?;
        let logger = self.logger();
        let run = || {
            let pool = self.pool_for(request.threads, &logger)?;
            export_batch(store, request, &pool, &self.config, &logger)
        };
        run().map_err(|e| e.in_stage(Stage::Export))
    }

    /// Export and publish as a descriptor pair the caller must release
    pub fn export_handles<S: RowStore + ?Sized>(
        &self,
        store: &S,
        request: &ExportRequest,
    ) -> Result<ArrowHandles> {
        let batch = self.export_batch(store, request)?;
        let handles = export_record_batch(batch).map_err(|e| e.in_stage(Stage::Handoff))?;
        self.published.lock().insert(handles);
        Ok(handles)
    }

    /// Long-text columns among `columns` holding non-text content in the rows
    pub fn prescan_binary<S: RowStore + ?Sized>(
        &self,
        store: &S,
        columns: &[String],
        start_row: usize,
        row_count: usize,
    ) -> Result<BTreeSet<String>> {
        self.ensure_open()?;
        let logger = self.logger();
        let candidates: AHashSet<&str> = columns.iter().map(String::as_str).collect();
        let columns = classify_export(store, columns, &candidates)
            .map_err(|e| e.in_stage(Stage::BinaryPrescan))?;
        prescan_binary(store, &columns, start_row, row_count, &logger)
            .map_err(|e| e.in_stage(Stage::BinaryPrescan))
    }

    /// Free a pair returned by [`Engine::export_handles`]
    pub fn release_arrow_pointers(&self, handles: ArrowHandles) -> Result<()> {
        if handles.is_null() {
            return Err(TransposeError::invalid_handle("null descriptor pair"));
        }
        if !self.published.lock().remove(&handles) {
            return Err(TransposeError::invalid_handle(format!(
                "descriptor pair ({:#x}, {:#x}) was not issued by this engine or was already released",
                handles.schema, handles.array
            )));
        }
        // SAFETY: the pair was produced by export_record_batch and has just
        // been removed from the registry, so it is freed exactly once.
        unsafe { free_handles(handles) };
        Ok(())
    }

    /// Number of published pairs not yet released
    pub fn outstanding_handles(&self) -> usize {
        self.published.lock().len()
    }

    /// Tear down the worker pool; the next call builds a new one
    pub fn shutdown(&self) {
        self.pool.shutdown(&self.logger());
    }

    /// Shut down and refuse every further call
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let outstanding = self.published.get_mut().len();
        if outstanding > 0 {
            self.logger.get_mut().warn(|| {
                format!(
                    "Dropping engine with {} unreleased descriptor pairs; leaving them allocated",
                    outstanding
                )
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use crate::memory_store::MemoryStore;
    use crate::types::StoreType;

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::builder()
                .default_threads(2)
                .log_level(LogLevel::Fatal)
                .build(),
        )
    }

    #[test]
    fn test_resolve_threads() {
        let engine = engine();
        assert_eq!(engine.resolve_threads(0), 2);
        assert_eq!(engine.resolve_threads(5), 5);
    }

    #[test]
    fn test_closed_engine_is_unavailable() {
        let engine = engine();
        let store = MemoryStore::with_layout(&[("x", StoreType::Float64)], 1).unwrap();
        engine.close();
        assert!(!engine.is_open());

        let err = engine
            .export_batch(&store, &ExportRequest::new(["x"], 0, 1))
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("pq clear"));
    }

    #[test]
    fn test_release_rejects_unknown_pairs() {
        let engine = engine();
        let err = engine
            .release_arrow_pointers(ArrowHandles::new(0x10, 0x20))
            .unwrap_err();
        assert!(matches!(err, TransposeError::InvalidHandle(_)));
        assert!(engine
            .release_arrow_pointers(ArrowHandles::new(0, 0))
            .is_err());
    }

    #[test]
    fn test_errors_carry_stage() {
        let engine = engine();
        let store = MemoryStore::with_layout(&[("x", StoreType::Float64)], 1).unwrap();
        let err = engine
            .export_batch(&store, &ExportRequest::new(["y"], 0, 1))
            .unwrap_err();
        assert_eq!(err.to_string(), "export failed: Unknown column: y");
    }
}
