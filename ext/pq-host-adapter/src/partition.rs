//! Hive-style partitioned output: one `key=value/` directory per distinct
//! combination of the partition columns, each holding a `data.parquet`

use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::compute::take_record_batch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow_array::{Array, ArrayRef, RecordBatch, UInt32Array};
use indexmap::IndexMap;
use parquet::basic::Compression;

use crate::codec::ParquetSink;
use crate::{ErrorContext, HostError, Result};

/// Directory value for a null or empty partition key
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// File written inside every partition directory
pub const PARTITION_FILE: &str = "data.parquet";

/// Percent-encode the characters hive reserves in directory names
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() || "\"#%'*/:=?\\{}[]^".contains(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{:02X}", byte);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether every subdirectory under `dir` is named `key=value` and every file
/// is a Parquet file
pub fn is_hive_directory(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if path.is_dir() {
            if !name.contains('=') || !is_hive_directory(&path)? {
                return Ok(false);
            }
        } else if !name.ends_with(".parquet") {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove a previous output at `path`.
///
/// Only a `.parquet` file or a hive partition directory is removed; any other
/// directory is an error and is left alone.
pub fn remove_existing(path: &str) -> Result<()> {
    let target = Path::new(path);
    if target.is_file() {
        if path.ends_with(".parquet") {
            fs::remove_file(target).with_context(|| format!("Removing {}", path))?;
        }
    } else if target.is_dir() {
        if !is_hive_directory(target)? {
            return Err(HostError::invalid_argument(format!(
                "{} is not a hive partition directory, not removed",
                path
            )));
        }
        fs::remove_dir_all(target).with_context(|| format!("Removing {}", path))?;
    }
    Ok(())
}

/// Writes record batches into per-partition Parquet files under one root
pub struct PartitionWriter {
    root: PathBuf,
    keys: Vec<String>,
    compression: Compression,
    sinks: IndexMap<String, ParquetSink<File>>,
}

impl PartitionWriter {
    /// Create the root directory; it must not hold anything yet
    pub fn create(root: &str, keys: &[String], compression: Compression) -> Result<Self> {
        let path = Path::new(root);
        if path.is_file() || (path.is_dir() && fs::read_dir(path)?.next().is_some()) {
            return Err(HostError::invalid_argument(format!(
                "{} already exists, pass overwrite to replace it",
                root
            )));
        }
        fs::create_dir_all(path).with_context(|| format!("Creating {}", root))?;
        Ok(Self {
            root: path.to_path_buf(),
            keys: keys.to_vec(),
            compression,
            sinks: IndexMap::new(),
        })
    }

    /// Relative directory of every row, from the partition key columns
    fn row_directories(&self, key_columns: &[ArrayRef], rows: usize) -> Result<Vec<String>> {
        let options = FormatOptions::default();
        let formatters = key_columns
            .iter()
            .map(|array| ArrayFormatter::try_new(array.as_ref(), &options))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut dirs = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut dir = String::new();
            for ((key, array), formatter) in self.keys.iter().zip(key_columns).zip(&formatters) {
                let value = if array.is_null(row) {
                    String::new()
                } else {
                    formatter.value(row).to_string()
                };
                let value = if value.is_empty() {
                    DEFAULT_PARTITION.to_string()
                } else {
                    escape_partition_value(&value)
                };
                if !dir.is_empty() {
                    dir.push('/');
                }
                let _ = write!(dir, "{}={}", escape_partition_value(key), value);
            }
            dirs.push(dir);
        }
        Ok(dirs)
    }

    /// Route each row of `data` to the partition named by `key_columns`
    pub fn write(&mut self, key_columns: &[ArrayRef], data: &RecordBatch) -> Result<()> {
        let mut groups: IndexMap<String, Vec<u32>> = IndexMap::new();
        for (row, dir) in self
            .row_directories(key_columns, data.num_rows())?
            .into_iter()
            .enumerate()
        {
            let row = u32::try_from(row)
                .map_err(|_| HostError::invalid_argument("batch too large to partition"))?;
            groups.entry(dir).or_default().push(row);
        }

        for (dir, rows) in groups {
            let part = take_record_batch(data, &UInt32Array::from(rows))?;
            if !self.sinks.contains_key(&dir) {
                let target = self.root.join(&dir);
                fs::create_dir_all(&target)
                    .with_context(|| format!("Creating {}", target.display()))?;
                let file = File::create(target.join(PARTITION_FILE))
                    .with_context(|| format!("Creating {}", target.display()))?;
                let sink = ParquetSink::new(file, part.schema(), self.compression)?;
                self.sinks.insert(dir.clone(), sink);
            }
            if let Some(sink) = self.sinks.get_mut(&dir) {
                sink.write(&part)?;
            }
        }
        Ok(())
    }

    /// Finish every file; returns the partition directories and total rows
    pub fn close(self) -> Result<(Vec<String>, usize)> {
        let mut dirs = Vec::with_capacity(self.sinks.len());
        let mut rows = 0;
        for (dir, sink) in self.sinks {
            rows += sink.close()?;
            dirs.push(dir);
        }
        Ok((dirs, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int32Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn test_escape_partition_value() {
        assert_eq!(escape_partition_value("north"), "north");
        assert_eq!(escape_partition_value("a/b=c"), "a%2Fb%3Dc");
        assert_eq!(escape_partition_value("100%"), "100%25");
        assert_eq!(escape_partition_value("tab\there"), "tab%09here");
    }

    #[test]
    fn test_rows_grouped_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out").to_string_lossy().into_owned();
        let mut writer =
            PartitionWriter::create(&root, &["region".to_string()], Compression::SNAPPY).unwrap();

        let keys: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec![
            Some("east"),
            None,
            Some("east"),
            Some(""),
        ]))];
        let data = RecordBatch::try_from_iter(vec![(
            "id",
            Arc::new(Int32Array::from(vec![1, 2, 3, 4])) as ArrayRef,
        )])
        .unwrap();
        writer.write(&keys, &data).unwrap();
        let (dirs, rows) = writer.close().unwrap();
        assert_eq!(rows, 4);
        assert_eq!(
            dirs,
            vec![
                "region=east".to_string(),
                format!("region={}", DEFAULT_PARTITION)
            ]
        );
        assert!(Path::new(&root).join("region=east").join(PARTITION_FILE).is_file());
        assert!(is_hive_directory(Path::new(&root)).unwrap());
    }

    #[test]
    fn test_create_refuses_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        assert!(PartitionWriter::create(&root, &[], Compression::SNAPPY).is_err());
    }

    #[test]
    fn test_remove_existing_only_touches_parquet_output() {
        let dir = tempfile::tempdir().unwrap();
        let hive = dir.path().join("hive");
        fs::create_dir_all(hive.join("year=2020")).unwrap();
        fs::write(hive.join("year=2020").join(PARTITION_FILE), "x").unwrap();
        remove_existing(&hive.to_string_lossy()).unwrap();
        assert!(!hive.exists());

        let plain = dir.path().join("plain");
        fs::create_dir_all(plain.join("notes")).unwrap();
        let err = remove_existing(&plain.to_string_lossy()).unwrap_err();
        assert!(err.to_string().contains("not a hive partition directory"));
        assert!(plain.join("notes").exists());

        let file = dir.path().join("old.parquet");
        fs::write(&file, "x").unwrap();
        remove_existing(&file.to_string_lossy()).unwrap();
        assert!(!file.exists());

        // nothing to remove is fine
        remove_existing(&dir.path().join("missing").to_string_lossy()).unwrap();
    }
}
