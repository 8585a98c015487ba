//! `read`: Parquet file into the row store

use std::sync::Arc;

use arrow::compute::{can_cast_types, cast};
use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use indexmap::IndexMap;
use parquet::file::reader::ChunkReader;
use pq_core::types::{import_cast_target, suggest_store_type};
use pq_core::{Engine, ImportRequest, PhysicalType, StoreLayout, StoreType};

use crate::codec::{max_text_len, ParquetSource, DEFAULT_READ_BATCH_SIZE};
use crate::command::ReadArgs;
use crate::condition::Condition;
use crate::varlist::expand_varlist;
use crate::{ErrorContext, HostError, Result};

/// Row counts below this are imported on one thread
pub const SINGLE_THREAD_ROWS: usize = 1_000;

/// What a `read` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    pub created: Vec<String>,
    pub dropped: Vec<String>,
}

#[derive(Debug)]
struct ColumnPlan {
    name: String,
    store_index: usize,
    cast_to: Option<DataType>,
}

/// Whether a column of `data_type` must be cast before it can land in a
/// variable of `store_type`
fn needs_cast(data_type: &DataType, store_type: StoreType) -> bool {
    match PhysicalType::from_data_type(data_type) {
        None => true,
        Some(physical) if physical.is_numeric() => !store_type.is_numeric(),
        Some(physical) if physical.is_binary() => store_type != StoreType::LongText,
        Some(_) => !store_type.is_string(),
    }
}

/// Longest value of each text column in `columns`, read from a fresh source
fn scan_text_widths<R: ChunkReader + 'static>(
    source: ParquetSource<R>,
    columns: &[String],
    skip: usize,
    limit: Option<usize>,
) -> Result<IndexMap<String, usize>> {
    let mut widths: IndexMap<String, usize> = IndexMap::new();
    if columns.is_empty() || limit == Some(0) {
        return Ok(widths);
    }
    for batch in source.into_reader(columns, skip, limit, DEFAULT_READ_BATCH_SIZE)? {
        let batch = batch?;
        let schema = batch.schema();
        for (field, array) in schema.fields().iter().zip(batch.columns()) {
            if let Some(len) = max_text_len(array.as_ref()) {
                let entry = widths.entry(field.name().to_string()).or_insert(0);
                *entry = (*entry).max(len);
            }
        }
    }
    Ok(widths)
}

/// Which rows of the filtered stream get imported
#[derive(Debug, Clone, Copy)]
struct RowWindow {
    skip: usize,
    limit: Option<usize>,
    seen: usize,
    taken: usize,
}

impl RowWindow {
    fn new(skip: usize, n_rows: usize) -> Self {
        Self {
            skip,
            limit: (n_rows > 0).then_some(n_rows),
            seen: 0,
            taken: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.taken >= limit)
    }

    /// The part of a filtered batch inside the window
    fn clip(&mut self, batch: &RecordBatch) -> Option<RecordBatch> {
        let rows = batch.num_rows();
        let start = self.skip.saturating_sub(self.seen).min(rows);
        self.seen += rows;
        let room = self.limit.map_or(usize::MAX, |limit| limit - self.taken);
        let len = (rows - start).min(room);
        self.taken += len;
        (len > 0).then(|| batch.slice(start, len))
    }
}

/// Read a Parquet source into `store`, appending rows after the existing ones.
///
/// `open` is called up to twice: once to size new text variables and once
/// for the import itself. With a condition, `offset` and `n_rows` count the
/// rows that pass it.
pub fn read_parquet<S, R, F>(
    engine: &Engine,
    store: &S,
    open: F,
    args: &ReadArgs,
) -> Result<ReadSummary>
where
    S: StoreLayout + ?Sized,
    R: ChunkReader + 'static,
    F: Fn() -> Result<ParquetSource<R>>,
{
    let logger = engine.logger();
    let source = open()?;
    let schema: SchemaRef = source.schema();
    let file_columns = source.column_names();
    let selected = expand_varlist(&args.varlist, &file_columns)?;
    if let Some(condition) = &args.condition {
        if let Some(name) = condition
            .columns()
            .into_iter()
            .find(|name| !file_columns.contains(name))
        {
            return Err(HostError::Condition(format!("unknown variable '{}'", name)));
        }
    }

    let skip = args.offset.saturating_sub(1);
    let available = source.num_rows().saturating_sub(skip);
    let rows = match args.n_rows {
        0 => available,
        n => n.min(available),
    };

    // new text variables need the longest value in the rows being read
    let unsized_text: Vec<String> = selected
        .iter()
        .filter(|name| store.variable_index(name).is_none())
        .filter(|name| {
            schema.field_with_name(name).is_ok_and(|f| {
                matches!(
                    f.data_type(),
                    DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
                )
            })
        })
        .cloned()
        .collect();
    // filtered rows are not known yet, so every row is scanned
    let widths = match args.condition {
        None => scan_text_widths(open()?, &unsized_text, skip, Some(rows))?,
        Some(_) => scan_text_widths(open()?, &unsized_text, 0, None)?,
    };

    let mut summary = ReadSummary {
        rows,
        ..ReadSummary::default()
    };
    let mut plans = Vec::with_capacity(selected.len());
    let mut special = Vec::new();
    for name in &selected {
        let field = schema.field_with_name(name)?;
        let (store_index, store_type) = match store.variable_index(name) {
            Some(index) => (index, store.store_type(index)?),
            None => {
                let store_type =
                    suggest_store_type(field.data_type(), widths.get(name).copied());
                if needs_cast(field.data_type(), store_type)
                    && !can_cast_types(field.data_type(), &import_cast_target(store_type))
                {
                    logger.warn(|| {
                        format!(
                            "Skipping column {}: type {} is not supported",
                            name,
                            field.data_type()
                        )
                    });
                    summary.dropped.push(name.clone());
                    continue;
                }
                let index = store
                    .add_variable(name, store_type)
                    .with_context(|| format!("Creating variable {}", name))?;
                summary.created.push(name.clone());
                (index, store_type)
            }
        };

        let cast_to = if needs_cast(field.data_type(), store_type) {
            let target = import_cast_target(store_type);
            if !can_cast_types(field.data_type(), &target) {
                logger.warn(|| {
                    format!(
                        "Skipping column {}: cannot convert {} to {}",
                        name,
                        field.data_type(),
                        store_type
                    )
                });
                summary.dropped.push(name.clone());
                continue;
            }
            Some(target)
        } else {
            None
        };

        if store_type == StoreType::LongText {
            special.push(name.clone());
        }
        summary.columns.push(name.clone());
        plans.push(ColumnPlan {
            name: name.clone(),
            store_index,
            cast_to,
        });
    }

    let existing = store.row_count();
    let request = plans.iter().fold(
        ImportRequest::new(existing + 1).with_special(special),
        |request, plan| request.map_column(plan.name.clone(), plan.store_index),
    );
    let consumed = match &args.condition {
        None => import_rows(engine, store, open()?, &plans, &request, args, skip, rows)?,
        Some(condition) => {
            import_filtered(engine, store, open()?, &plans, &request, args, condition)?
        }
    };

    logger.info(|| {
        format!(
            "Read {} rows into {} variables ({} created)",
            consumed,
            summary.columns.len(),
            summary.created.len()
        )
    });
    summary.rows = consumed;
    Ok(summary)
}

fn threads_for(rows: usize, requested: usize) -> usize {
    if rows < SINGLE_THREAD_ROWS {
        1
    } else {
        requested
    }
}

/// Import `rows` rows after the first `skip`, sizing the store up front
#[allow(clippy::too_many_arguments)]
fn import_rows<S, R>(
    engine: &Engine,
    store: &S,
    source: ParquetSource<R>,
    plans: &[ColumnPlan],
    request: &ImportRequest,
    args: &ReadArgs,
    skip: usize,
    rows: usize,
) -> Result<usize>
where
    S: StoreLayout + ?Sized,
    R: ChunkReader + 'static,
{
    let existing = request.base_row - 1;
    store.set_row_count(existing + rows)?;
    if rows == 0 {
        return Ok(0);
    }

    let threads = threads_for(rows, args.threads);
    let columns: Vec<String> = plans.iter().map(|plan| plan.name.clone()).collect();
    let mut consumed = 0;
    for batch in source.into_reader(&columns, skip, Some(rows), args.batch_size)? {
        let batch = prepare_batch(&batch?, plans)?;
        let request = ImportRequest {
            base_row: existing + 1 + consumed,
            threads,
            ..request.clone()
        };
        engine.assign_batch(store, &batch, &request)?;
        consumed += batch.num_rows();
    }
    Ok(consumed)
}

/// Import the rows passing `condition`, growing the store batch by batch
fn import_filtered<S, R>(
    engine: &Engine,
    store: &S,
    source: ParquetSource<R>,
    plans: &[ColumnPlan],
    request: &ImportRequest,
    args: &ReadArgs,
    condition: &Condition,
) -> Result<usize>
where
    S: StoreLayout + ?Sized,
    R: ChunkReader + 'static,
{
    let existing = request.base_row - 1;
    let mut columns: Vec<String> = plans.iter().map(|plan| plan.name.clone()).collect();
    for name in condition.columns() {
        if !columns.contains(&name) {
            columns.push(name);
        }
    }

    let mut window = RowWindow::new(args.offset.saturating_sub(1), args.n_rows);
    let mut consumed = 0;
    for batch in source.into_reader(&columns, 0, None, args.batch_size)? {
        if window.is_full() {
            break;
        }
        let passed = condition.filter(&batch?)?;
        let Some(batch) = window.clip(&passed) else {
            continue;
        };
        let batch = prepare_batch(&batch, plans)?;
        store.set_row_count(existing + consumed + batch.num_rows())?;
        let request = ImportRequest {
            base_row: existing + 1 + consumed,
            threads: threads_for(batch.num_rows(), args.threads),
            ..request.clone()
        };
        engine.assign_batch(store, &batch, &request)?;
        consumed += batch.num_rows();
    }
    store.set_row_count(existing + consumed)?;
    Ok(consumed)
}

/// Cast the columns that need it, in plan order
fn prepare_batch(batch: &RecordBatch, plans: &[ColumnPlan]) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(plans.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(plans.len());
    for plan in plans {
        let Some(array) = batch.column_by_name(&plan.name) else {
            continue;
        };
        let array = match &plan.cast_to {
            Some(target) => cast(array, target)
                .with_context(|| format!("Converting column {}", plan.name))?,
            None => array.clone(),
        };
        fields.push(Field::new(&plan.name, array.data_type().clone(), true));
        columns.push(array);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}

pub fn read_file<S: StoreLayout + ?Sized>(
    engine: &Engine,
    store: &S,
    args: &ReadArgs,
) -> Result<ReadSummary> {
    read_parquet(engine, store, || ParquetSource::open(&args.path), args)
}
