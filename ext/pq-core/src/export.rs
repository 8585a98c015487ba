//! Row store into a new columnar batch

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::{Field, Schema};

use crate::classify::{classify_export, name_set, ColumnDescriptor, ExportColumn};
use crate::config::EngineConfig;
use crate::dispatch::run_batches;
use crate::error::Stage;
use crate::handlers::{ColumnBuffer, ExportSlot};
use crate::logger::Logger;
use crate::pool::PoolHandle;
use crate::prescan::{prescan_binary, store_rows};
use crate::store::RowStore;
use crate::types::{export_field, StoreType};
use crate::wave::{split_batches, RowRange};
use crate::{ErrorContext, Result};

/// Parameters of one export call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    pub columns: Vec<String>,
    /// 0-based first row; batch row `i` reads store row `start_row + i + 1`
    pub start_row: usize,
    pub row_count: usize,
    /// Worker count; 0 uses the engine default
    pub threads: usize,
    /// Columns that must take the sequential long-text path
    pub special_columns: Vec<String>,
    /// Precomputed binary columns; skips the prescan when set
    pub binary_hint: Option<BTreeSet<String>>,
}

impl ExportRequest {
    pub fn new<I, S>(columns: I, start_row: usize, row_count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            start_row,
            row_count,
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_special<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_columns.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_binary_hint(mut self, binary: BTreeSet<String>) -> Self {
        self.binary_hint = Some(binary);
        self
    }
}

fn is_binary(column: &ExportColumn, binary: &BTreeSet<String>) -> bool {
    column.is_special && column.store_type == StoreType::LongText && binary.contains(&column.name)
}

pub(crate) fn export_batch<S: RowStore + ?Sized>(
    store: &S,
    request: &ExportRequest,
    pool: &PoolHandle,
    config: &EngineConfig,
    logger: &Logger,
) -> Result<RecordBatch> {
    let rows = request.row_count;
    let start_row = request.start_row;
    let special = name_set(&request.special_columns);
    let columns = classify_export(store, &request.columns, &special)?;
    store_rows(store, start_row, rows)?;

    let binary = match &request.binary_hint {
        Some(hint) => hint.clone(),
        None => prescan_binary(store, &columns, start_row, rows, logger)?,
    };

    let descriptors: Vec<ColumnDescriptor> = columns
        .iter()
        .enumerate()
        .map(|(position, column)| column.descriptor(position, is_binary(column, &binary)))
        .collect();
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| export_field(&c.name, c.store_type, is_binary(c, &binary)))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let mut buffers = descriptors
        .iter()
        .map(|d| ColumnBuffer::allocate(d, rows))
        .collect::<Result<Vec<_>>>()?;

    // Rows past the end of the store stay null
    let available = store.row_count().saturating_sub(start_row).min(rows);
    let batches = split_batches(RowRange::new(0, available), pool.threads());
    logger.debug(|| {
        format!(
            "Exporting {} of {} rows from store row {} in {} batches ({} binary columns)",
            available,
            rows,
            start_row + 1,
            batches.len(),
            binary.len()
        )
    });

    {
        let mut per_batch: Vec<Vec<ExportSlot<'_>>> =
            batches.iter().map(|_| Vec::new()).collect();
        let mut special_slots = Vec::new();

        for (descriptor, buffer) in descriptors.iter().zip(buffers.iter_mut()) {
            if descriptor.is_special {
                special_slots.push(ExportSlot::bind(
                    descriptor,
                    buffer.full(),
                    config.binary_chunk_size,
                ));
            } else {
                for (slots, slice) in per_batch.iter_mut().zip(buffer.split(&batches)) {
                    slots.push(ExportSlot::bind(
                        descriptor,
                        slice,
                        config.binary_chunk_size,
                    ));
                }
            }
        }

        let tasks = batches.iter().copied().zip(per_batch).collect();
        run_batches(pool, Stage::Export, tasks, |range, mut slots| {
            let first_store_row = start_row + range.start + 1;
            for local in 0..range.len() {
                for slot in slots.iter_mut() {
                    slot.fill(store, logger, local, first_store_row + local)?;
                }
            }
            Ok(())
        })?;

        for (slot, descriptor) in special_slots
            .iter_mut()
            .zip(descriptors.iter().filter(|d| d.is_special))
        {
            slot.fill_rows(store, logger, 0..available, start_row + 1)
                .with_context(|| format!("Reading long-text column '{}'", descriptor.name))?;
        }
    }

    let arrays = buffers.into_iter().map(ColumnBuffer::into_array).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    let batch = RecordBatch::try_new_with_options(schema, arrays, &options)?;
    logger.info(|| {
        format!(
            "Exported {} rows x {} columns",
            batch.num_rows(),
            batch.num_columns()
        )
    });
    Ok(batch)
}
