//! Parquet file access built on the `parquet` crate's Arrow reader and writer

use std::fs::File;
use std::io::Write;
use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;

use crate::{ErrorContext, HostError, Result};

/// Record batch size used when the caller passes 0
pub const DEFAULT_READ_BATCH_SIZE: usize = 65_536;

/// Open `path` for reading, mapping a missing file to [`HostError::FileNotFound`]
pub fn open_file(path: &str) -> Result<File> {
    if !Path::new(path).exists() {
        return Err(HostError::FileNotFound(path.to_string()));
    }
    File::open(path).with_context(|| format!("Opening {}", path))
}

/// Compression codec for a codec name and optional level.
///
/// Levels out of the codec's range fall back to its default.
pub fn parse_compression(name: &str, level: Option<u32>) -> Result<Compression> {
    let compression = match name.to_ascii_lowercase().as_str() {
        "uncompressed" | "none" => Compression::UNCOMPRESSED,
        "snappy" => Compression::SNAPPY,
        "gzip" => Compression::GZIP(
            level
                .map(|l| GzipLevel::try_new(l).unwrap_or_default())
                .unwrap_or_default(),
        ),
        "brotli" => Compression::BROTLI(
            level
                .map(|l| BrotliLevel::try_new(l).unwrap_or_default())
                .unwrap_or_default(),
        ),
        "lz4" => Compression::LZ4,
        "zstd" => Compression::ZSTD(
            level
                .and_then(|l| i32::try_from(l).ok())
                .map(|l| ZstdLevel::try_new(l).unwrap_or_default())
                .unwrap_or_default(),
        ),
        "lzo" => {
            return Err(HostError::invalid_argument(
                "lzo compression is not supported for writing",
            ))
        }
        other => {
            return Err(HostError::invalid_argument(format!(
                "Unknown compression '{}', expected one of uncompressed, snappy, gzip, brotli, lz4, zstd",
                other
            )))
        }
    };
    Ok(compression)
}

/// Longest text value in bytes, `None` for non-text arrays
pub fn max_text_len(array: &dyn Array) -> Option<usize> {
    let longest = match array.data_type() {
        DataType::Utf8 => array.as_string::<i32>().iter().flatten().map(str::len).max(),
        DataType::LargeUtf8 => array.as_string::<i64>().iter().flatten().map(str::len).max(),
        DataType::Utf8View => array.as_string_view().iter().flatten().map(str::len).max(),
        _ => return None,
    };
    Some(longest.unwrap_or(0))
}

/// A Parquet source with its metadata loaded
pub struct ParquetSource<R: ChunkReader> {
    builder: ParquetRecordBatchReaderBuilder<R>,
}

impl ParquetSource<File> {
    pub fn open(path: &str) -> Result<Self> {
        let file = open_file(path)?;
        Self::new(file).with_context(|| format!("Reading metadata of {}", path))
    }
}

impl<R: ChunkReader + 'static> ParquetSource<R> {
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self {
            builder: ParquetRecordBatchReaderBuilder::try_new(reader)?,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.builder.schema().clone()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        usize::try_from(self.builder.metadata().file_metadata().num_rows()).unwrap_or(0)
    }

    /// Batch reader over `columns`, skipping `skip` rows and stopping after `limit`
    pub fn into_reader(
        self,
        columns: &[String],
        skip: usize,
        limit: Option<usize>,
        batch_size: usize,
    ) -> Result<ParquetRecordBatchReader> {
        let indices: Vec<usize> = self
            .builder
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| columns.iter().any(|c| c == field.name()))
            .map(|(idx, _)| idx)
            .collect();
        let mask = ProjectionMask::roots(self.builder.parquet_schema(), indices);

        let mut builder = self
            .builder
            .with_projection(mask)
            .with_batch_size(batch_size.max(1));
        if skip > 0 {
            builder = builder.with_offset(skip);
        }
        if let Some(limit) = limit {
            builder = builder.with_limit(limit);
        }
        Ok(builder.build()?)
    }
}

/// Arrow to Parquet writer with the chosen compression
pub struct ParquetSink<W: Write + Send> {
    writer: ArrowWriter<W>,
    rows: usize,
}

impl<W: Write + Send> ParquetSink<W> {
    pub fn new(writer: W, schema: SchemaRef, compression: Compression) -> Result<Self> {
        let props = WriterProperties::builder()
            .set_compression(compression)
            .build();
        Ok(Self {
            writer: ArrowWriter::try_new(writer, schema, Some(props))?,
            rows: 0,
        })
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.writer.write(batch)?;
        self.rows += batch.num_rows();
        Ok(())
    }

    /// Finish the file and return the number of rows written
    pub fn close(self) -> Result<usize> {
        self.writer.close()?;
        Ok(self.rows)
    }
}
