//! `describe`: column types of a Parquet file and their suggested store types

use arrow_schema::DataType;
use indexmap::IndexMap;
use parquet::file::reader::ChunkReader;
use pq_core::types::suggest_store_type;
use serde::Serialize;

use crate::codec::{max_text_len, ParquetSource, DEFAULT_READ_BATCH_SIZE};
use crate::console::HostConsole;
use crate::Result;

/// One Parquet column and the store variable it would become
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub arrow_type: String,
    pub store_type: String,
    /// Longest value in bytes, text columns only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_length: Option<usize>,
    /// Null cells, detailed mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub n_rows: usize,
    pub columns: Vec<ColumnInfo>,
}

impl FileSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Print the column table and totals
    pub fn display(&self, console: &dyn HostConsole) {
        let width = self
            .columns
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(0)
            .max("variable".len());
        console.display(&format!(
            "{:<width$}  {:<16}  {:<8}  {}",
            "variable", "arrow type", "type", "nulls",
            width = width
        ));
        for column in &self.columns {
            let nulls = column
                .null_count
                .map(|n| n.to_string())
                .unwrap_or_default();
            console.display(&format!(
                "{:<width$}  {:<16}  {:<8}  {}",
                column.name, column.arrow_type, column.store_type, nulls,
                width = width
            ));
        }
        console.display("");
        console.display(&format!("n columns = {}", self.columns.len()));
        console.display(&format!("n rows = {}", self.n_rows));
    }
}

#[derive(Default)]
struct ColumnStats {
    longest: Option<usize>,
    nulls: usize,
}

/// Summarize the columns of `source`.
///
/// Text columns are scanned for their longest value; `detailed` scans every
/// column and also counts nulls.
pub fn describe_source<R: ChunkReader + 'static>(
    source: ParquetSource<R>,
    detailed: bool,
) -> Result<FileSummary> {
    let schema = source.schema();
    let n_rows = source.num_rows();

    let scanned: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| {
            detailed
                || matches!(
                    f.data_type(),
                    DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
                )
        })
        .map(|f| f.name().to_string())
        .collect();

    let mut stats: IndexMap<String, ColumnStats> = scanned
        .iter()
        .map(|name| (name.clone(), ColumnStats::default()))
        .collect();

    if !scanned.is_empty() {
        for batch in source.into_reader(&scanned, 0, None, DEFAULT_READ_BATCH_SIZE)? {
            let batch = batch?;
            let batch_schema = batch.schema();
            for (field, array) in batch_schema.fields().iter().zip(batch.columns()) {
                let Some(entry) = stats.get_mut(field.name()) else {
                    continue;
                };
                entry.nulls += array.null_count();
                if let Some(len) = max_text_len(array.as_ref()) {
                    entry.longest = Some(entry.longest.unwrap_or(0).max(len));
                }
            }
        }
    }

    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let stat = stats.get(field.name());
            let longest = stat.and_then(|s| s.longest);
            ColumnInfo {
                name: field.name().to_string(),
                arrow_type: field.data_type().to_string(),
                store_type: suggest_store_type(field.data_type(), longest).to_string(),
                string_length: longest,
                null_count: if detailed { stat.map(|s| s.nulls) } else { None },
            }
        })
        .collect();

    Ok(FileSummary { n_rows, columns })
}

pub fn describe_file(path: &str, detailed: bool) -> Result<FileSummary> {
    describe_source(ParquetSource::open(path)?, detailed)
}
