//! Parallel transposition between Arrow batches and a row store
//!
//! `pq-core` moves data in both directions between a columnar
//! [`arrow_array::RecordBatch`] and an external store addressed by
//! `(variable, row)`. It knows nothing about the host that owns the store;
//! host adapters implement [`store::RowStore`] and call into an [`Engine`].
//!
//! # Key Components
//!
//! - **Type Mapper** ([`types`]): store type tags to Arrow field types and back
//!
//! - **Column Classifier** ([`classify`]): regular columns that tolerate
//!   concurrent disjoint-row access, and special long-text/binary columns that
//!   are walked by a single thread
//!
//! - **Binary Prescanner** ([`prescan`]): column-wide decision whether a
//!   long-text column is exported as text or binary
//!
//! - **Scheduling** ([`wave`], [`pool`]): imports run in waves bounded by a
//!   cache budget; each wave or export is split into one disjoint row batch
//!   per worker on a reusable rayon pool
//!
//! - **Transfer Handlers**: per-column handlers bound once per call to a
//!   concrete array type, so the row loops carry no type tests
//!
//! - **Handoff** ([`ffi`]): zero-copy import of foreign Arrow C data
//!   interface descriptors, and publication of exported batches as
//!   descriptor pairs that must be released explicitly
//!
//! # Row numbering
//!
//! Batches are 0-based and the store is 1-based. Imports write batch row `i`
//! to store row `base_row + i`; exports read batch row `i` from store row
//! `start_row + i + 1`.

pub mod classify;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod export;
pub mod ffi;
mod handlers;
pub mod import;
pub mod logger;
pub mod memory_store;
pub mod pool;
pub mod prescan;
pub mod store;
pub mod types;
pub mod wave;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::Engine;
pub use error::{ErrorContext, Result, Stage, TransposeError, UNAVAILABLE_MESSAGE};
pub use export::ExportRequest;
pub use ffi::ArrowHandles;
pub use import::{ImportRequest, ImportSummary};
pub use logger::{LogLevel, LogSink, Logger};
pub use memory_store::MemoryStore;
pub use store::{BinaryConnector, RowStore, StoreLayout};
pub use types::{PhysicalType, StoreType};
