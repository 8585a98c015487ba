//! Columnar batch into the row store

use arrow_array::RecordBatch;
use indexmap::IndexMap;

use crate::classify::{classify_import, name_set};
use crate::config::EngineConfig;
use crate::dispatch::run_batches;
use crate::error::Stage;
use crate::handlers::ImportHandler;
use crate::logger::Logger;
use crate::pool::PoolHandle;
use crate::store::RowStore;
use crate::wave::{plan_waves, rows_per_wave, split_batches};
use crate::{ErrorContext, Result, TransposeError};

/// Parameters of one import call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRequest {
    /// 1-based store row receiving batch row 0
    pub base_row: usize,
    /// Worker count; 0 uses the engine default
    pub threads: usize,
    /// Columns that must take the sequential long-text path
    pub special_columns: Vec<String>,
    /// Batch column name to 1-based store variable index
    pub column_map: IndexMap<String, usize>,
}

impl ImportRequest {
    pub fn new(base_row: usize) -> Self {
        Self {
            base_row,
            ..Self::default()
        }
    }

    /// Build from parallel name/index lists
    pub fn from_pairs(
        base_row: usize,
        threads: usize,
        special_columns: Vec<String>,
        column_names: Vec<String>,
        store_indices: Vec<usize>,
    ) -> Result<Self> {
        if column_names.len() != store_indices.len() {
            return Err(TransposeError::invalid_argument(format!(
                "{} column names but {} store indices",
                column_names.len(),
                store_indices.len()
            )));
        }
        Ok(Self {
            base_row,
            threads,
            special_columns,
            column_map: column_names.into_iter().zip(store_indices).collect(),
        })
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

    pub fn map_column<S: Into<String>>(mut self, name: S, store_index: usize) -> Self {
        self.column_map.insert(name.into(), store_index);
        self
    }
}

/// What an import call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows: usize,
    pub waves: usize,
    pub rows_per_wave: usize,
    pub max_wave_rows: usize,
    pub regular_columns: usize,
    pub special_columns: usize,
    pub skipped_columns: Vec<String>,
}

pub(crate) fn assign_batch<S: RowStore + ?Sized>(
    store: &S,
    batch: &RecordBatch,
    request: &ImportRequest,
    pool: &PoolHandle,
    config: &EngineConfig,
    logger: &Logger,
) -> Result<ImportSummary> {
    let rows = batch.num_rows();
    let base_row = request.base_row;
    if base_row == 0 {
        return Err(TransposeError::invalid_argument(
            "base row is 1-based and must be at least 1",
        ));
    }
    if rows > 0 {
        let last = base_row.checked_add(rows - 1).ok_or_else(|| {
            TransposeError::invalid_argument(format!(
                "base row {} + {} rows overflow the row index",
                base_row, rows
            ))
        })?;
        if last > store.row_count() {
            return Err(TransposeError::invalid_argument(format!(
                "rows {}..={} exceed the store's {} rows",
                base_row,
                last,
                store.row_count()
            )));
        }
    }

    let special = name_set(&request.special_columns);
    let plan = classify_import(
        &batch.schema(),
        &request.column_map,
        &special,
        store.variable_count(),
        logger,
    )?;

    let regular = plan
        .regular
        .iter()
        .map(|d| ImportHandler::bind(d, batch.column(d.position)))
        .collect::<Result<Vec<_>>>()?;

    let wave_rows = rows_per_wave(
        regular.len(),
        rows,
        config.cache_budget_bytes,
        config.min_wave_rows,
    );
    let waves = if regular.is_empty() {
        Vec::new()
    } else {
        plan_waves(rows, wave_rows)
    };
    logger.debug(|| {
        format!(
            "Importing {} rows at store row {}: {} waves of up to {} rows on {} threads",
            rows,
            base_row,
            waves.len(),
            wave_rows,
            pool.threads()
        )
    });

    let mut max_wave_rows = 0;
    for wave in &waves {
        max_wave_rows = max_wave_rows.max(wave.len());
        let tasks = split_batches(*wave, pool.threads())
            .into_iter()
            .map(|range| (range, ()))
            .collect();
        run_batches(pool, Stage::Import, tasks, |range, ()| {
            for handler in &regular {
                handler.transfer(store, range.rows(), base_row)?;
            }
            Ok(())
        })?;
    }

    for descriptor in &plan.special {
        let handler = ImportHandler::bind(descriptor, batch.column(descriptor.position))?;
        handler
            .transfer(store, 0..rows, base_row)
            .with_context(|| format!("Writing long-text column '{}'", handler.name()))?;
    }

    let summary = ImportSummary {
        rows,
        waves: waves.len(),
        rows_per_wave: wave_rows,
        max_wave_rows,
        regular_columns: plan.regular.len(),
        special_columns: plan.special.len(),
        skipped_columns: plan.skipped,
    };
    logger.info(|| {
        format!(
            "Imported {} rows ({} regular, {} special columns)",
            summary.rows, summary.regular_columns, summary.special_columns
        )
    });
    Ok(summary)
}
