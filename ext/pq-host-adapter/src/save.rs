//! `save`: row store into a Parquet file or a hive partition directory

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;

use arrow_array::{ArrayRef, RecordBatch};
use pq_core::{Engine, ExportRequest, RowStore, StoreType};

use crate::codec::{parse_compression, ParquetSink};
use crate::command::SaveArgs;
use crate::condition::Condition;
use crate::partition::{remove_existing, PartitionWriter};
use crate::varlist::expand_varlist;
use crate::{ErrorContext, HostError, Result};

/// Rows exported per record batch
pub const SAVE_CHUNK_ROWS: usize = 100_000;

/// What a `save` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    /// Long-text columns written as binary
    pub binary_columns: BTreeSet<String>,
    /// Partition directories written, relative to the output path
    pub partitions: Vec<String>,
}

fn selected_columns<S: RowStore + ?Sized>(store: &S, varlist: &str) -> Result<Vec<String>> {
    let names: Vec<String> = (1..=store.variable_count())
        .filter_map(|index| store.variable_name(index))
        .collect();
    expand_varlist(varlist, &names)
}

/// Partition and condition variables must exist; returns the condition's
fn check_names<S: RowStore + ?Sized>(store: &S, args: &SaveArgs) -> Result<Vec<String>> {
    for key in &args.partition_by {
        if store.variable_index(key).is_none() {
            return Err(HostError::invalid_argument(format!(
                "partition variable '{}' not found",
                key
            )));
        }
    }
    let condition_columns = args
        .condition
        .as_ref()
        .map(Condition::columns)
        .unwrap_or_default();
    if let Some(name) = condition_columns
        .iter()
        .find(|name| store.variable_index(name).is_none())
    {
        return Err(HostError::Condition(format!("unknown variable '{}'", name)));
    }
    Ok(condition_columns)
}

/// Columns and rows a save exports
#[derive(Debug)]
struct SavePlan {
    /// Columns written to the output files
    columns: Vec<String>,
    /// Positions of `columns` within `exported`
    column_positions: Vec<usize>,
    /// Positions of the partition keys within `exported`
    key_positions: Vec<usize>,
    /// Written columns followed by partition keys and condition inputs
    exported: Vec<String>,
    long_text: Vec<String>,
    binary: BTreeSet<String>,
    start_row: usize,
    rows: usize,
}

impl SavePlan {
    fn new<S: RowStore + ?Sized>(engine: &Engine, store: &S, args: &SaveArgs) -> Result<Self> {
        let selected = selected_columns(store, &args.varlist)?;
        let condition_columns = check_names(store, args)?;

        let columns: Vec<String> = selected
            .into_iter()
            .filter(|name| !args.partition_by.contains(name))
            .collect();
        if columns.is_empty() {
            return Err(HostError::invalid_argument(
                "no variables left to write besides the partition variables",
            ));
        }
        let mut exported = columns.clone();
        for name in args.partition_by.iter().chain(&condition_columns) {
            if !exported.contains(name) {
                exported.push(name.clone());
            }
        }
        let position = |name: &String| exported.iter().position(|e| e == name);
        let column_positions = columns.iter().filter_map(position).collect();
        let key_positions = args.partition_by.iter().filter_map(position).collect();

        let start_row = args.offset.saturating_sub(1);
        let available = store.row_count().saturating_sub(start_row);
        let rows = match args.n_rows {
            0 => available,
            n => n.min(available),
        };

        let mut long_text = Vec::new();
        for name in &exported {
            if let Some(index) = store.variable_index(name) {
                if store.store_type(index)? == StoreType::LongText {
                    long_text.push(name.clone());
                }
            }
        }
        // one decision for the whole range keeps every chunk's schema identical
        let binary = engine.prescan_binary(store, &long_text, start_row, rows)?;

        Ok(Self {
            columns,
            column_positions,
            key_positions,
            exported,
            long_text,
            binary,
            start_row,
            rows,
        })
    }

    fn data(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        Ok(batch.project(&self.column_positions)?)
    }

    fn keys(&self, batch: &RecordBatch) -> Vec<ArrayRef> {
        self.key_positions
            .iter()
            .map(|&i| batch.column(i).clone())
            .collect()
    }
}

/// Exports the planned rows chunk by chunk, dropping rows that fail the
/// condition. The first call always yields a batch, empty or not, so writers
/// see the schema.
struct ChunkExporter<'a, S: RowStore + ?Sized> {
    engine: &'a Engine,
    store: &'a S,
    plan: &'a SavePlan,
    args: &'a SaveArgs,
    exported: usize,
    started: bool,
}

impl<'a, S: RowStore + ?Sized> ChunkExporter<'a, S> {
    fn new(engine: &'a Engine, store: &'a S, plan: &'a SavePlan, args: &'a SaveArgs) -> Self {
        Self {
            engine,
            store,
            plan,
            args,
            exported: 0,
            started: false,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<RecordBatch>> {
        let plan = self.plan;
        if self.started && self.exported >= plan.rows {
            return Ok(None);
        }
        self.started = true;

        let chunk_rows = (plan.rows - self.exported).min(SAVE_CHUNK_ROWS);
        let request = ExportRequest::new(
            plan.exported.iter().cloned(),
            plan.start_row + self.exported,
            chunk_rows,
        )
        .with_threads(self.args.threads)
        .with_special(plan.long_text.iter().cloned())
        .with_binary_hint(plan.binary.clone());
        let batch = self.engine.export_batch(self.store, &request)?;
        self.exported = if batch.num_rows() == 0 {
            plan.rows
        } else {
            self.exported + batch.num_rows()
        };
        let logger = self.engine.logger();
        logger.debug(|| format!("Exported {} of {} rows", self.exported, plan.rows));

        match &self.args.condition {
            Some(condition) => Ok(Some(condition.filter(&batch)?)),
            None => Ok(Some(batch)),
        }
    }
}

/// Write the selected rows of `store` to `writer` as Parquet
pub fn save_to<S, W>(engine: &Engine, store: &S, writer: W, args: &SaveArgs) -> Result<SaveSummary>
where
    S: RowStore + ?Sized,
    W: Write + Send,
{
    let logger = engine.logger();
    let plan = SavePlan::new(engine, store, args)?;
    let compression = parse_compression(&args.compression, args.level)?;

    let mut chunks = ChunkExporter::new(engine, store, &plan, args);
    let mut writer = Some(writer);
    let mut sink = None;
    while let Some(batch) = chunks.next_chunk()? {
        let batch = plan.data(&batch)?;
        if let Some(writer) = writer.take() {
            sink = Some(ParquetSink::new(writer, batch.schema(), compression)?);
        }
        if let Some(sink) = sink.as_mut() {
            sink.write(&batch)?;
        }
    }
    let rows = match sink {
        Some(sink) => sink.close()?,
        None => 0,
    };

    logger.info(|| format!("Saved {} rows of {} variables", rows, plan.columns.len()));
    Ok(SaveSummary {
        rows,
        columns: plan.columns,
        binary_columns: plan.binary,
        partitions: Vec::new(),
    })
}

/// Write the selected rows under `args.path` split by `args.partition_by`
pub fn save_partitioned<S: RowStore + ?Sized>(
    engine: &Engine,
    store: &S,
    args: &SaveArgs,
) -> Result<SaveSummary> {
    let logger = engine.logger();
    let plan = SavePlan::new(engine, store, args)?;
    let compression = parse_compression(&args.compression, args.level)?;

    let mut writer = PartitionWriter::create(&args.path, &args.partition_by, compression)?;
    let mut chunks = ChunkExporter::new(engine, store, &plan, args);
    while let Some(batch) = chunks.next_chunk()? {
        writer.write(&plan.keys(&batch), &plan.data(&batch)?)?;
    }
    let (partitions, rows) = writer.close()?;

    logger.info(|| {
        format!(
            "Saved {} rows of {} variables into {} partitions",
            rows,
            plan.columns.len(),
            partitions.len()
        )
    });
    Ok(SaveSummary {
        rows,
        columns: plan.columns,
        binary_columns: plan.binary,
        partitions,
    })
}

pub fn save_file<S: RowStore + ?Sized>(
    engine: &Engine,
    store: &S,
    args: &SaveArgs,
) -> Result<SaveSummary> {
    // validate before touching an existing output
    parse_compression(&args.compression, args.level)?;
    selected_columns(store, &args.varlist)?;
    check_names(store, args)?;
    if args.overwrite {
        remove_existing(&args.path)?;
    }
    if !args.partition_by.is_empty() {
        return save_partitioned(engine, store, args);
    }
    let file = File::create(&args.path).with_context(|| format!("Creating {}", args.path))?;
    save_to(engine, store, file, args)
}
